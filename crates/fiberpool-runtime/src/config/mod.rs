//! Pool and scheduler configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder methods
//! 2. Environment variables (runtime, via `from_env()`)
//! 3. `FIBERPOOL_CONFIG_RS` file (compile-time, merged by build.rs)
//! 4. Library defaults
//!
//! # Example
//!
//! ```rust,ignore
//! use fiberpool_runtime::config::PoolConfig;
//! use fiberpool_runtime::ReadyPolicy;
//!
//! let config = PoolConfig::from_env()
//!     .stack_size(64 * 1024)
//!     .ready_policy(ReadyPolicy::Lifo);
//! ```

pub mod defaults;

use std::time::Duration;

use fiberpool_core::constants::{MAX_POOL_WORKERS, MIN_STACK_SIZE};
use fiberpool_core::env::{env_get, env_get_bool, env_get_str, env_is_set};
use fiberpool_core::ConfigError;

use crate::ready_queue::ReadyPolicy;

/// Configuration shared by the fiber scheduler, fiber pools and the
/// shared-work pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Usable stack bytes per fiber (a guard page is added below)
    pub stack_size: usize,
    /// Largest worker count one fiber pool may be resized to
    pub max_workers: usize,
    /// Order in which the scheduler resumes ready fibers
    pub ready_policy: ReadyPolicy,
    /// OS threads started by `SharedWorkPool`
    pub share_threads: usize,
    /// How long an idle shared-work thread parks before rechecking
    pub share_park_timeout: Duration,
    /// Raise runtime log verbosity to debug
    pub debug_logging: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl PoolConfig {
    /// Create config from compile-time defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `FIBERPOOL_STACK_SIZE` - Stack bytes per fiber
    /// - `FIBERPOOL_MAX_WORKERS` - Max workers per fiber pool
    /// - `FIBERPOOL_READY_POLICY` - `fifo` or `lifo`
    /// - `FIBERPOOL_SHARE_THREADS` - Threads in a shared-work pool
    /// - `FIBERPOOL_SHARE_PARK_TIMEOUT_MS` - Idle park timeout
    /// - `FIBERPOOL_DEBUG` - Enable debug logging (0/1)
    pub fn from_env() -> Self {
        let default_policy = ReadyPolicy::parse(defaults::READY_POLICY).unwrap_or_default();
        let policy = env_get_str("FIBERPOOL_READY_POLICY", defaults::READY_POLICY);
        Self {
            stack_size: env_get("FIBERPOOL_STACK_SIZE", defaults::STACK_SIZE),
            max_workers: env_get("FIBERPOOL_MAX_WORKERS", defaults::MAX_WORKERS),
            ready_policy: ReadyPolicy::parse(&policy).unwrap_or(default_policy),
            share_threads: env_get("FIBERPOOL_SHARE_THREADS", defaults::SHARE_THREADS),
            share_park_timeout: Duration::from_millis(env_get(
                "FIBERPOOL_SHARE_PARK_TIMEOUT_MS",
                defaults::SHARE_PARK_TIMEOUT_MS,
            )),
            debug_logging: env_get_bool("FIBERPOOL_DEBUG", defaults::DEBUG_LOGGING),
        }
    }

    /// Create config with compile-time defaults only (no env override).
    pub fn new() -> Self {
        Self {
            stack_size: defaults::STACK_SIZE,
            max_workers: defaults::MAX_WORKERS,
            ready_policy: ReadyPolicy::parse(defaults::READY_POLICY).unwrap_or_default(),
            share_threads: defaults::SHARE_THREADS,
            share_park_timeout: Duration::from_millis(defaults::SHARE_PARK_TIMEOUT_MS),
            debug_logging: defaults::DEBUG_LOGGING,
        }
    }

    // Builder methods

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }

    pub fn ready_policy(mut self, policy: ReadyPolicy) -> Self {
        self.ready_policy = policy;
        self
    }

    pub fn share_threads(mut self, n: usize) -> Self {
        self.share_threads = n;
        self
    }

    pub fn share_park_timeout(mut self, d: Duration) -> Self {
        self.share_park_timeout = d;
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::InvalidValue("stack_size below 16 KiB"));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidValue("max_workers must be > 0"));
        }
        if self.max_workers > MAX_POOL_WORKERS {
            return Err(ConfigError::InvalidValue("max_workers exceeds 65536"));
        }
        if self.share_threads == 0 {
            return Err(ConfigError::InvalidValue("share_threads must be > 0"));
        }
        if self.share_park_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("share_park_timeout must be > 0"));
        }
        Ok(())
    }

    /// Apply `debug_logging` to the global log level (never lowers it)
    pub(crate) fn apply_logging(&self) {
        use fiberpool_core::log::{log_level, set_log_level, LogLevel};
        if self.raises_log_level() && log_level() < LogLevel::Debug {
            set_log_level(LogLevel::Debug);
        }
    }

    /// An explicit `FIBERPOOL_LOG_LEVEL` wins over `debug_logging`
    fn raises_log_level(&self) -> bool {
        self.debug_logging && !env_is_set("FIBERPOOL_LOG_LEVEL")
    }
}
