//! Worker fibers and the per-generation state they share with the pool
//!
//! A *generation* is one worker set: created by a resize, retired by the
//! next resize or by teardown. Everything in it is `Cell`/`RefCell`; only
//! one fiber of the thread runs at a time.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};

use fiberpool_core::{fp_trace, CancellationToken, TaskFailure};

use crate::fiber::{panic_message, FiberCancelled};
use crate::pool::report::TaskOutcome;
use crate::scheduler::park_current;
use crate::tls;

/// The round's task with its borrow lifetime erased
///
/// Only dereferenced while the round that published it is active; the
/// dispatcher clears it before returning.
#[derive(Clone, Copy)]
pub(crate) struct TaskRef(*const (dyn Fn(usize) + 'static));

impl TaskRef {
    /// # Safety
    ///
    /// `task` must outlive every `call` made through the returned ref.
    pub(crate) unsafe fn erase<'a>(task: &'a (dyn Fn(usize) + 'a)) -> Self {
        let ptr: *const (dyn Fn(usize) + 'a) = task;
        TaskRef(std::mem::transmute::<
            *const (dyn Fn(usize) + 'a),
            *const (dyn Fn(usize) + 'static),
        >(ptr))
    }

    unsafe fn call(self, index: usize) {
        (*self.0)(index)
    }
}

pub(crate) struct PoolShared {
    size: usize,
    pub(crate) token: CancellationToken,
    task: Cell<Option<TaskRef>>,
    active: Cell<bool>,
    epoch: Cell<u64>,
    finished: Cell<usize>,
    outcomes: RefCell<Vec<Option<TaskOutcome>>>,
}

impl PoolShared {
    pub(crate) fn new(size: usize, token: CancellationToken) -> Self {
        Self {
            size,
            token,
            task: Cell::new(None),
            active: Cell::new(false),
            epoch: Cell::new(0),
            finished: Cell::new(0),
            outcomes: RefCell::new(Vec::new()),
        }
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn finished(&self) -> usize {
        self.finished.get()
    }

    #[inline]
    pub(crate) fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Publish `task` as a new round
    pub(crate) fn begin(&self, task: TaskRef) {
        debug_assert!(!self.active.get());
        *self.outcomes.borrow_mut() = vec![None; self.size];
        self.finished.set(0);
        self.epoch.set(self.epoch.get() + 1);
        self.task.set(Some(task));
        self.active.set(true);
    }

    /// Withdraw the task; idempotent
    pub(crate) fn end(&self) {
        self.active.set(false);
        self.task.set(None);
    }

    /// Outcomes of the finished round, in index order
    pub(crate) fn take_outcomes(&self) -> Vec<TaskOutcome> {
        self.outcomes
            .take()
            .into_iter()
            .enumerate()
            .map(|(i, o)| {
                o.unwrap_or_else(|| TaskOutcome::Failed(TaskFailure::new(i, "task did not run")))
            })
            .collect()
    }

    /// Task of the current round, unless this worker already ran it
    fn claim(&self, last_epoch: u64) -> Option<(u64, TaskRef)> {
        let epoch = self.epoch.get();
        if !self.active.get() || epoch == last_epoch {
            return None;
        }
        self.task.get().map(|task| (epoch, task))
    }

    /// Record one finished invocation; true for the one that closes the round
    fn complete(&self, index: usize, outcome: TaskOutcome) -> bool {
        if let Some(slot) = self.outcomes.borrow_mut().get_mut(index) {
            *slot = Some(outcome);
        }
        let finished = self.finished.get() + 1;
        debug_assert!(finished <= self.size);
        self.finished.set(finished);
        if finished == self.size {
            self.end();
            true
        } else {
            false
        }
    }
}

/// Body of worker `index`: run each round's task once, until cancelled
pub(crate) fn worker_loop(shared: &PoolShared, index: usize, token: &CancellationToken) {
    let mut last_epoch = 0;
    loop {
        if token.is_cancelled() {
            break;
        }
        let Some((epoch, task)) = shared.claim(last_epoch) else {
            park_current();
            continue;
        };
        last_epoch = epoch;

        let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe { task.call(index) }));
        tls::clear_current_unwinding();
        let outcome = match result {
            Ok(()) => TaskOutcome::Completed,
            Err(payload) if payload.is::<FiberCancelled>() => break,
            Err(payload) => TaskOutcome::Failed(TaskFailure::new(index, panic_message(&*payload))),
        };
        if shared.complete(index, outcome) {
            fp_trace!("round {} complete ({} workers)", epoch, shared.size);
        }
    }
    fp_trace!("worker {} exiting", index);
}
