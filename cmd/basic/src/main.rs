//! Basic fiberpool example
//!
//! Runs the counter round on three workers, resizes the pool to 64, and
//! repeats a round on the shared-work strategy.
//!
//! # Environment Variables
//!
//! - `FIBERPOOL_LOG_FLUSH=1` - Flush log output immediately
//! - `FIBERPOOL_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `FIBERPOOL_READY_POLICY=lifo` - Resume order of ready fibers

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicUsize, Ordering};

use fiberpool::{fp_debug, fp_info, yield_now, ConcurrentFor, PoolConfig, Runtime, SharedWorkPool};

// FIBERPOOL_LOG_LEVEL=debug cargo run -p fiberpool-basic
fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== fiberpool Basic Example ===\n");

    let config = PoolConfig::from_env().stack_size(64 * 1024);
    let rt = Runtime::new(config)?;
    let pool = rt.pool()?;

    let counter = Cell::new(3);
    let increments = Cell::new(0);
    let report = pool.dispatch(3, |worker| {
        while counter.get() < 10 {
            counter.set(counter.get() + 1);
            increments.set(increments.get() + 1);
            fp_debug!("worker {} raised counter to {}", worker, counter.get());
            yield_now();
        }
    })?;
    println!(
        "round {}: counter = {} after {} increments",
        report.round(),
        counter.get(),
        increments.get()
    );

    let seen = RefCell::new(Vec::new());
    pool.dispatch(64, |worker| seen.borrow_mut().push(worker))?.into_result()?;
    let stats = pool.stats();
    println!(
        "resized to {} workers ({} spawned, {} joined, {} resizes)",
        pool.num_workers(),
        stats.workers_spawned,
        stats.workers_joined,
        stats.resizes
    );

    let shared = SharedWorkPool::new(rt.config())?;
    let hits = AtomicUsize::new(0);
    shared
        .concurrent_for(1000, |_| {
            hits.fetch_add(1, Ordering::Relaxed);
        })?
        .into_result()?;
    fp_info!("shared-work round ran on {} threads", shared.num_threads());
    println!("shared-work: {} invocations", hits.load(Ordering::Relaxed));

    pool.teardown();
    println!("\n=== Example Complete ===");
    Ok(())
}
