//! Work-sharing pool on OS threads
//!
//! `concurrent_for(n, task)` pushes the indices `0..n` onto one shared
//! queue; every pool thread pops whatever index comes next. The dispatcher
//! blocks on a condition variable until the remaining count drops to zero.
//!
//! Unlike the fiber `Pool`, indices are not tied to threads: index `i` may
//! run on any thread, and one thread may run many indices of a round.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use fiberpool_core::{
    fp_debug, fp_error, SchedError, SchedResult, TaskFailure, WorkerError,
};

use crate::config::PoolConfig;
use crate::fiber::panic_message;
use crate::pool::{RoundReport, TaskOutcome};
use crate::strategy::ConcurrentFor;

thread_local! {
    /// Address of the pool this thread works for, 0 for other threads
    static SHARE_WORKER_OF: Cell<usize> = const { Cell::new(0) };
}

#[inline]
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Tasks run outside every lock, so poisoning carries no meaning here.
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The round's task with its borrow lifetime erased
#[derive(Clone, Copy)]
struct SyncTaskRef(*const (dyn Fn(usize) + Sync + 'static));

// The pointee is Sync and outlives every call (see `Round`).
unsafe impl Send for SyncTaskRef {}
unsafe impl Sync for SyncTaskRef {}

impl SyncTaskRef {
    unsafe fn erase<'a>(task: &'a (dyn Fn(usize) + Sync + 'a)) -> Self {
        let ptr: *const (dyn Fn(usize) + Sync + 'a) = task;
        SyncTaskRef(std::mem::transmute::<
            *const (dyn Fn(usize) + Sync + 'a),
            *const (dyn Fn(usize) + Sync + 'static),
        >(ptr))
    }
}

/// One dispatch; the task is only called while `remaining > 0`
struct Round {
    task: SyncTaskRef,
    remaining: Mutex<usize>,
    done: Condvar,
    outcomes: Mutex<Vec<Option<TaskOutcome>>>,
}

struct Job {
    index: usize,
    round: Arc<Round>,
}

impl Job {
    fn run(self) {
        let Job { index, round } = self;
        let task = round.task;
        let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe { (*task.0)(index) }));
        let outcome = match result {
            Ok(()) => TaskOutcome::Completed,
            Err(payload) => TaskOutcome::Failed(TaskFailure::new(index, panic_message(&*payload))),
        };
        if let Some(slot) = lock(&round.outcomes).get_mut(index) {
            *slot = Some(outcome);
        }

        let mut remaining = lock(&round.remaining);
        *remaining -= 1;
        if *remaining == 0 {
            round.done.notify_all();
        }
    }
}

struct Shared {
    queue: SegQueue<Job>,
    idle: Mutex<()>,
    wake: Condvar,
    shutdown: AtomicBool,
    park_timeout: Duration,
    rounds: AtomicU64,
}

/// Pool of OS threads sharing one index queue
pub struct SharedWorkPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl SharedWorkPool {
    /// Start `config.share_threads` worker threads
    pub fn new(config: &PoolConfig) -> SchedResult<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            queue: SegQueue::new(),
            idle: Mutex::new(()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
            park_timeout: config.share_park_timeout,
            rounds: AtomicU64::new(0),
        });

        let mut pool = Self { shared, threads: Vec::with_capacity(config.share_threads) };
        for i in 0..config.share_threads {
            let shared = Arc::clone(&pool.shared);
            let spawned = thread::Builder::new()
                .name(format!("fiberpool-share-{}", i))
                .spawn(move || share_worker(shared));
            match spawned {
                Ok(handle) => pool.threads.push(handle),
                Err(e) => {
                    fp_error!("spawning share thread {} failed: {}", i, e);
                    pool.shutdown();
                    return Err(WorkerError::SpawnFailed.into());
                }
            }
        }
        fp_debug!("shared-work pool started with {} threads", pool.threads.len());
        Ok(pool)
    }

    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// Rounds dispatched so far
    pub fn rounds(&self) -> u64 {
        self.shared.rounds.load(Ordering::Relaxed)
    }

    fn run_round<F>(&self, n: usize, task: F) -> SchedResult<RoundReport>
    where
        F: Fn(usize) + Sync,
    {
        let me = Arc::as_ptr(&self.shared) as usize;
        if SHARE_WORKER_OF.with(|c| c.get()) == me {
            // Waiting on our own threads from one of them can deadlock.
            return Err(SchedError::Reentrant);
        }
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(SchedError::Cancelled);
        }
        let round_no = self.shared.rounds.fetch_add(1, Ordering::Relaxed) + 1;
        if n == 0 {
            return Ok(RoundReport::new(round_no, true, Vec::new()));
        }

        let round = Arc::new(Round {
            task: unsafe { SyncTaskRef::erase(&task) },
            remaining: Mutex::new(n),
            done: Condvar::new(),
            outcomes: Mutex::new(vec![None; n]),
        });
        for index in 0..n {
            self.shared.queue.push(Job { index, round: Arc::clone(&round) });
        }
        {
            let _idle = lock(&self.shared.idle);
            self.shared.wake.notify_all();
        }

        let mut remaining = lock(&round.remaining);
        while *remaining > 0 {
            remaining = round.done.wait(remaining).unwrap_or_else(PoisonError::into_inner);
        }
        drop(remaining);

        let outcomes = std::mem::take(&mut *lock(&round.outcomes))
            .into_iter()
            .enumerate()
            .map(|(i, o)| {
                o.unwrap_or_else(|| TaskOutcome::Failed(TaskFailure::new(i, "task did not run")))
            })
            .collect();
        Ok(RoundReport::new(round_no, true, outcomes))
    }

    /// Stop and join every thread; idempotent
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _idle = lock(&self.shared.idle);
            self.shared.wake.notify_all();
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                fp_error!("{}", SchedError::from(WorkerError::Panicked));
            }
        }
    }
}

impl ConcurrentFor for SharedWorkPool {
    fn concurrent_for<F>(&self, n: usize, task: F) -> SchedResult<RoundReport>
    where
        F: Fn(usize) + Sync,
    {
        self.run_round(n, task)
    }
}

impl Drop for SharedWorkPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn share_worker(shared: Arc<Shared>) {
    SHARE_WORKER_OF.with(|c| c.set(Arc::as_ptr(&shared) as usize));
    loop {
        if let Some(job) = shared.queue.pop() {
            job.run();
            continue;
        }
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        let idle = lock(&shared.idle);
        // Re-checked under the lock the dispatcher notifies with.
        if shared.queue.is_empty() && !shared.shutdown.load(Ordering::Acquire) {
            let _ = shared.wake.wait_timeout(idle, shared.park_timeout);
        }
    }
}
