//! # fiberpool-core
//!
//! Core types for the fiberpool cooperative task pool.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Stacks, context switching and the schedulers live in `fiberpool-runtime`.
//!
//! ## Modules
//!
//! - `id` - Fiber identifier type
//! - `state` - Fiber and pool lifecycle enums
//! - `cancel` - Cancellation token for cooperative cancellation
//! - `error` - Error types
//! - `log` - Leveled stderr logging macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod state;
pub mod cancel;
pub mod error;
pub mod log;
pub mod env;

// Re-exports for convenience
pub use id::FiberId;
pub use state::{FiberState, PoolState};
pub use cancel::CancellationToken;
pub use error::{ConfigError, MemoryError, SchedError, SchedResult, TaskFailure, WorkerError};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

/// Constants for stack layout and pool limits
pub mod constants {
    /// Guard page size (4 KB), left PROT_NONE below every fiber stack
    pub const GUARD_SIZE: usize = 4096;

    /// Smallest stack a fiber may be configured with
    pub const MIN_STACK_SIZE: usize = 16 * 1024;

    /// Default usable stack per fiber
    pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

    /// Upper bound on workers in one fiber pool
    pub const MAX_POOL_WORKERS: usize = 65536;

    /// No fiber sentinel value
    pub const FIBER_NONE: u32 = u32::MAX;
}
