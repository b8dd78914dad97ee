//! # fiberpool-runtime
//!
//! Platform-specific runtime for the fiberpool task pool.
//!
//! This crate provides:
//! - Guarded fiber stacks (mmap)
//! - Context switching (architecture-specific assembly)
//! - The per-thread cooperative fiber scheduler
//! - The fiber `Pool` behind `concurrent_for`
//! - `SharedWorkPool`, a work-sharing strategy on OS threads
//! - Configuration (compile-time defaults + environment overrides)

pub mod arch;
pub mod config;
pub mod pool;
pub mod ready_queue;
pub mod scheduler;
pub mod shared_work;
pub mod stack;
pub mod strategy;
pub mod tls;

mod fiber;

// Re-exports
pub use config::PoolConfig;
pub use pool::{
    concurrent_for, default_pool, shutdown_default_pool, Pool, PoolStats, RoundReport,
    TaskOutcome,
};
pub use ready_queue::{FifoQueue, LifoQueue, ReadyPolicy, ReadyQueue};
pub use scheduler::{block_on, spawn, yield_now, JoinHandle, Scheduler, SchedulerStats};
pub use shared_work::SharedWorkPool;
pub use strategy::ConcurrentFor;
pub use tls::{current_fiber_id, current_token, is_in_fiber};

cfg_if::cfg_if! {
    if #[cfg(not(unix))] {
        compile_error!("fiberpool stacks need a Unix mmap");
    }
}
