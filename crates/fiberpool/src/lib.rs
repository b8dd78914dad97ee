//! # fiberpool - cooperative `concurrent_for` on stackful fibers
//!
//! Runs one task per index `0..n` on a pool of fibers that all live on the
//! calling OS thread. Invocations interleave only where they call
//! `yield_now()`, so they can share `Cell`/`RefCell` state without locks.
//! The pool is kept between calls and reused while `n` stays the same.
//!
//! ## Features
//!
//! - **Stackful fibers**: mmap'd stacks with a guard page, hand-written
//!   context switch for x86_64 and aarch64
//! - **Reusable pools**: same `n` reuses the worker fibers, a new `n` resizes
//! - **Borrowing tasks**: the task may borrow from the caller's frame
//! - **Cancellation**: token based, observed at every `yield_now()`
//! - **Panic capture**: a panicking index becomes a failure in the report
//! - **Work sharing**: `SharedWorkPool` runs the same interface on OS threads
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::cell::Cell;
//! use fiberpool::{concurrent_for, yield_now};
//!
//! let counter = Cell::new(3);
//! concurrent_for(3, |_worker| {
//!     while counter.get() < 10 {
//!         counter.set(counter.get() + 1);
//!         yield_now();
//!     }
//! })?;
//! assert_eq!(counter.get(), 10);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     User Code                        │
//! │     concurrent_for(), Pool::dispatch(), yield_now()  │
//! └──────────────────────────────────────────────────────┘
//!                           │
//!          ┌────────────────┴────────────────┐
//!          ▼                                 ▼
//! ┌──────────────────┐              ┌──────────────────┐
//! │   Pool (fibers)  │              │  SharedWorkPool  │
//! │ workers 0..n-1   │              │ OS threads +     │
//! │ round epoch      │              │ SegQueue indices │
//! └──────────────────┘              └──────────────────┘
//!          │
//!          ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              Scheduler (one per thread)              │
//! │   ready queue (fifo/lifo), scheduling passes         │
//! └──────────────────────────────────────────────────────┘
//!          │
//!          ▼
//! ┌──────────────────────────────────────────────────────┐
//! │        Fiber stacks (mmap + guard) / arch asm        │
//! └──────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use fiberpool_core::{
    CancellationToken, ConfigError, FiberId, FiberState, MemoryError, PoolState, SchedError,
    SchedResult, TaskFailure, WorkerError,
};

// Re-export logging macros
pub use fiberpool_core::{fp_debug, fp_error, fp_info, fp_trace, fp_warn};
pub use fiberpool_core::log::{init as init_logging, set_flush_enabled, set_log_level, LogLevel};

// Re-export env utilities
pub use fiberpool_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use fiberpool_runtime::{
    ConcurrentFor, JoinHandle, Pool, PoolConfig, PoolStats, ReadyPolicy, RoundReport, Scheduler,
    SchedulerStats, SharedWorkPool, TaskOutcome,
};
pub use fiberpool_runtime::{default_pool, shutdown_default_pool};

/// Per-thread runtime handle
///
/// Creating one fixes this thread's scheduler configuration; pools made
/// through it use the same configuration.
pub struct Runtime {
    sched: Scheduler,
    config: PoolConfig,
}

impl Runtime {
    /// Initialise this thread's scheduler with `config`
    ///
    /// Fails with `AlreadyInitialized` if the thread already has one.
    pub fn new(config: PoolConfig) -> SchedResult<Self> {
        let sched = Scheduler::init_current(&config)?;
        Ok(Self { sched, config })
    }

    /// Use this thread's scheduler, creating it from the environment if needed
    pub fn current() -> SchedResult<Self> {
        Ok(Self { sched: Scheduler::current()?, config: PoolConfig::from_env() })
    }

    /// Run `f` as a fiber until it finishes
    pub fn block_on<F, T>(&self, f: F) -> SchedResult<T>
    where
        F: FnOnce() -> T + 'static,
        T: 'static,
    {
        self.sched.block_on(f)
    }

    pub fn spawn<F>(&self, f: F) -> SchedResult<JoinHandle>
    where
        F: FnOnce(&CancellationToken) + 'static,
    {
        self.sched.spawn(f)
    }

    /// New fiber pool with this runtime's configuration
    pub fn pool(&self) -> SchedResult<Pool> {
        Pool::with_config(&self.config)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

/// Run `task(i)` once for every `i` in `0..n`, interleaved on fibers of
/// this thread's default pool, and return once all have finished
///
/// Calling it again with the same `n` reuses the pool's workers. Nesting a
/// call inside a task fails with `SchedError::Reentrant`; use a separate
/// `Pool` for nested rounds.
///
/// # Example
///
/// ```ignore
/// use std::cell::RefCell;
/// use fiberpool::concurrent_for;
///
/// let squares = RefCell::new(vec![0; 8]);
/// concurrent_for(8, |i| squares.borrow_mut()[i] = i * i)?;
/// ```
#[inline]
pub fn concurrent_for<F>(n: usize, task: F) -> SchedResult<()>
where
    F: Fn(usize),
{
    fiberpool_runtime::concurrent_for(n, task)
}

/// Spawn a fiber on this thread's scheduler
///
/// The closure receives the fiber's `CancellationToken`.
///
/// # Example
///
/// ```ignore
/// use fiberpool::{spawn, yield_now};
///
/// let handle = spawn(|token| {
///     while !token.is_cancelled() {
///         yield_now();
///     }
/// })?;
/// handle.cancel();
/// ```
pub fn spawn<F>(f: F) -> SchedResult<JoinHandle>
where
    F: FnOnce(&CancellationToken) + 'static,
{
    fiberpool_runtime::spawn(f)
}

/// Yield execution to the scheduler
///
/// Inside a fiber the fiber goes back on the ready queue and resumes on
/// the next pass; a cancelled fiber unwinds from here. Called from outside
/// any fiber this runs one scheduling pass.
#[inline]
pub fn yield_now() {
    fiberpool_runtime::yield_now()
}

/// Run `f` as a fiber on this thread's scheduler until it finishes
pub fn block_on<F, T>(f: F) -> SchedResult<T>
where
    F: FnOnce() -> T + 'static,
    T: 'static,
{
    fiberpool_runtime::block_on(f)
}

/// Get the current fiber's ID
///
/// Returns `FiberId::NONE` if not running in a fiber.
#[inline]
pub fn current_id() -> FiberId {
    fiberpool_runtime::current_fiber_id()
}

/// Check if currently executing within a fiber
#[inline]
pub fn is_in_fiber() -> bool {
    fiberpool_runtime::is_in_fiber()
}

/// Cancellation token of the running fiber (never cancels on the root)
#[inline]
pub fn current_token() -> CancellationToken {
    fiberpool_runtime::current_token()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_pool_uses_config() {
        std::thread::spawn(|| {
            let rt = Runtime::new(PoolConfig::new().stack_size(32 * 1024).max_workers(4)).unwrap();
            let pool = rt.pool().unwrap();
            assert_eq!(
                pool.dispatch(5, |_| {}),
                Err(SchedError::WorkerError(WorkerError::TooManyWorkers(5)))
            );
            assert!(pool.dispatch(4, |_| {}).unwrap().is_success());
            assert!(matches!(
                Runtime::new(PoolConfig::new()),
                Err(SchedError::AlreadyInitialized)
            ));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_current_id_inside_fiber() {
        assert!(!is_in_fiber());
        assert!(current_id().is_none());
        let id = block_on(|| {
            assert!(is_in_fiber());
            current_id()
        })
        .unwrap();
        assert!(id.is_some());
    }
}
