//! Reusable fiber pool behind `concurrent_for`
//!
//! A `Pool` keeps a set of worker fibers, one per index `0..n`. Each
//! dispatch publishes a task, lets every worker run it once with its own
//! index, and waits cooperatively (by yielding) until all have finished.
//! Dispatching again with the same `n` reuses the same fibers; a different
//! `n` retires the whole set and spawns a new one.
//!
//! ```text
//! Uninitialized -> Idle -> Dispatching -> Idle -> ... -> Cancelling -> Terminated
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::cell::Cell;
//! use fiberpool_runtime::{yield_now, Pool};
//!
//! let pool = Pool::new()?;
//! let hits = Cell::new(0);
//! let report = pool.dispatch(4, |_index| {
//!     hits.set(hits.get() + 1);
//!     yield_now();
//! })?;
//! assert!(report.is_success());
//! assert_eq!(hits.get(), 4);
//! ```

pub mod report;
mod worker;

pub use report::{PoolStats, RoundReport, TaskOutcome};

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use fiberpool_core::{
    fp_debug, fp_error, CancellationToken, FiberId, PoolState, SchedError, SchedResult,
    WorkerError,
};

use crate::config::PoolConfig;
use crate::scheduler::{JoinHandle, Scheduler};
use crate::strategy::ConcurrentFor;
use crate::tls;

use worker::{worker_loop, PoolShared, TaskRef};

thread_local! {
    static DEFAULT_POOL: RefCell<Option<Rc<Pool>>> = const { RefCell::new(None) };
}

struct Worker {
    index: usize,
    handle: JoinHandle,
}

/// Pool of worker fibers on this thread's scheduler
pub struct Pool {
    sched: Scheduler,
    stack_size: usize,
    max_workers: usize,
    /// User-facing token; every generation token is a child of it
    cancel: CancellationToken,
    state: Cell<PoolState>,
    shared: RefCell<Option<Rc<PoolShared>>>,
    workers: RefCell<Vec<Worker>>,
    stats: Cell<PoolStats>,
}

/// Clears the published task on every exit from a round
struct RoundGuard<'a>(&'a PoolShared);

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

impl Pool {
    /// Pool configured from `PoolConfig::from_env()`; no workers yet
    pub fn new() -> SchedResult<Self> {
        Self::with_config(&PoolConfig::from_env())
    }

    pub fn with_config(config: &PoolConfig) -> SchedResult<Self> {
        config.validate()?;
        Ok(Self {
            sched: Scheduler::current()?,
            stack_size: config.stack_size,
            max_workers: config.max_workers,
            cancel: CancellationToken::new(),
            state: Cell::new(PoolState::Uninitialized),
            shared: RefCell::new(None),
            workers: RefCell::new(Vec::new()),
            stats: Cell::new(PoolStats::default()),
        })
    }

    /// Run `task(i)` once for every `i` in `0..n` on `n` worker fibers
    ///
    /// Returns once every invocation has finished. Invocations interleave
    /// at their `yield_now()` calls; a panicking invocation is recorded in
    /// the report and does not stop the others.
    ///
    /// Errors: `Reentrant` if this pool already has a round in flight,
    /// `Cancelled` if the pool (or the fiber calling this) was cancelled,
    /// `TooManyWorkers` above the configured maximum, and stack allocation
    /// failures while spawning workers.
    pub fn dispatch<F>(&self, n: usize, task: F) -> SchedResult<RoundReport>
    where
        F: Fn(usize),
    {
        match self.state.get() {
            PoolState::Dispatching | PoolState::Cancelling => return Err(SchedError::Reentrant),
            PoolState::Terminated => return Err(SchedError::Cancelled),
            PoolState::Uninitialized | PoolState::Idle => {}
        }
        if self.cancel.is_cancelled() {
            self.teardown();
            return Err(SchedError::Cancelled);
        }
        if n > self.max_workers {
            return Err(WorkerError::TooManyWorkers(n).into());
        }
        if n == 0 {
            let round = self.bump(|s| s.rounds += 1).rounds;
            return Ok(RoundReport::new(round, false, Vec::new()));
        }

        self.state.set(PoolState::Dispatching);
        let reused = match self.resize(n) {
            Ok(reused) => reused,
            Err(e) => {
                self.state.set(PoolState::Uninitialized);
                return Err(e);
            }
        };
        let Some(shared) = self.shared.borrow().clone() else {
            self.state.set(PoolState::Uninitialized);
            return Err(SchedError::InvalidState);
        };

        let waited = {
            let _round = RoundGuard(&shared);
            shared.begin(unsafe { TaskRef::erase(&task) });
            self.wait_round(&shared)
        };

        match waited {
            Ok(()) => {
                let outcomes = shared.take_outcomes();
                let round = self.bump(|s| s.rounds += 1).rounds;
                self.state.set(PoolState::Idle);
                if self.cancel.is_cancelled() {
                    self.teardown();
                }
                Ok(RoundReport::new(round, reused, outcomes))
            }
            Err(e) => {
                // Workers may still hold frames borrowing `task`; they must be
                // gone before it is dropped.
                self.retire_workers();
                if self.cancel.is_cancelled() {
                    self.state.set(PoolState::Terminated);
                } else {
                    self.state.set(PoolState::Uninitialized);
                }
                Err(e)
            }
        }
    }

    fn wait_round(&self, shared: &PoolShared) -> SchedResult<()> {
        while shared.finished() < shared.size() {
            if shared.token.is_cancelled() || tls::current_cancelled() {
                return Err(SchedError::Cancelled);
            }
            self.sched.yield_raw();
        }
        Ok(())
    }

    /// Make the worker set exactly `n` (> 0); true when reused as is
    fn resize(&self, n: usize) -> SchedResult<bool> {
        let current = self.workers.borrow().len();
        if current == n && self.shared.borrow().is_some() {
            return Ok(true);
        }
        if current > 0 {
            fp_debug!("resizing pool {} -> {}", current, n);
            self.retire_workers();
            self.bump(|s| s.resizes += 1);
        }

        let shared = Rc::new(PoolShared::new(n, self.cancel.child()));
        let mut workers = Vec::with_capacity(n);
        for index in 0..n {
            let worker_shared = Rc::clone(&shared);
            let spawned = self.sched.spawn_with(
                shared.token.clone(),
                self.stack_size,
                move |token| worker_loop(&worker_shared, index, token),
            );
            match spawned {
                Ok(handle) => workers.push(Worker { index, handle }),
                Err(e) => {
                    fp_error!("spawning worker {} of {} failed: {}", index, n, e);
                    shared.token.cancel();
                    let count = workers.len() as u64;
                    for w in workers {
                        let _ = w.handle.join_quiet();
                    }
                    self.bump(|s| {
                        s.workers_spawned += count;
                        s.workers_joined += count;
                    });
                    return Err(e);
                }
            }
        }

        self.bump(|s| s.workers_spawned += n as u64);
        *self.shared.borrow_mut() = Some(shared);
        *self.workers.borrow_mut() = workers;
        Ok(false)
    }

    /// Cancel the current generation and join all of its workers
    fn retire_workers(&self) {
        let prev = self.state.replace(PoolState::Cancelling);
        if let Some(shared) = self.shared.borrow_mut().take() {
            shared.token.cancel();
            shared.end();
        }

        let workers = std::mem::take(&mut *self.workers.borrow_mut());
        let count = workers.len();
        for w in workers {
            if let Err(e) = w.handle.join_quiet() {
                fp_error!("joining worker {} failed: {}", w.index, e);
            }
        }
        if count > 0 {
            fp_debug!("joined {} workers", count);
            self.bump(|s| s.workers_joined += count as u64);
        }
        self.state.set(prev);
    }

    /// Cancel and join every worker; the pool accepts no further rounds
    ///
    /// Idempotent. Called from inside one of this pool's own tasks it only
    /// requests cancellation, and the running dispatch finishes the job.
    pub fn teardown(&self) {
        self.cancel.cancel();
        match self.state.get() {
            PoolState::Dispatching | PoolState::Cancelling | PoolState::Terminated => return,
            PoolState::Uninitialized | PoolState::Idle => {}
        }
        self.retire_workers();
        self.state.set(PoolState::Terminated);
        fp_debug!("pool terminated");
    }

    /// Request cancellation; workers stop at their next suspension point
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this pool when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> PoolState {
        self.state.get()
    }

    pub fn num_workers(&self) -> usize {
        self.workers.borrow().len()
    }

    /// Fiber ids of the current workers, by index
    pub fn worker_ids(&self) -> Vec<FiberId> {
        self.workers.borrow().iter().map(|w| w.handle.id()).collect()
    }

    /// Invocations finished so far in the current (or last) round
    pub fn finished_count(&self) -> usize {
        self.shared.borrow().as_ref().map_or(0, |s| s.finished())
    }

    /// Whether a task is currently published to the workers
    pub fn is_active(&self) -> bool {
        self.shared.borrow().as_ref().is_some_and(|s| s.is_active())
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.get()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    fn bump(&self, f: impl FnOnce(&mut PoolStats)) -> PoolStats {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
        stats
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl ConcurrentFor for Pool {
    fn concurrent_for<F>(&self, n: usize, task: F) -> SchedResult<RoundReport>
    where
        F: Fn(usize) + Sync,
    {
        self.dispatch(n, task)
    }
}

/// This thread's default pool, created on first use
pub fn default_pool() -> SchedResult<Rc<Pool>> {
    DEFAULT_POOL
        .try_with(|slot| -> SchedResult<Rc<Pool>> {
            if let Some(pool) = slot.borrow().as_ref() {
                return Ok(Rc::clone(pool));
            }
            let pool = Rc::new(Pool::new()?);
            *slot.borrow_mut() = Some(Rc::clone(&pool));
            Ok(pool)
        })
        .map_err(|_| SchedError::NotInitialized)?
}

/// Tear down this thread's default pool; the next use creates a fresh one
pub fn shutdown_default_pool() {
    let pool = DEFAULT_POOL
        .try_with(|slot| slot.borrow_mut().take())
        .ok()
        .flatten();
    if let Some(pool) = pool {
        pool.teardown();
    }
}

/// Run `task(i)` for every `i` in `0..n` on this thread's default pool
///
/// Fails with `TaskFailed` when any invocation panicked.
pub fn concurrent_for<F>(n: usize, task: F) -> SchedResult<()>
where
    F: Fn(usize),
{
    default_pool()?.dispatch(n, task)?.into_result()
}
