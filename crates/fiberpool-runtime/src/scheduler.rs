//! Cooperative fiber scheduler
//!
//! One scheduler per OS thread. The thread's original stack is the *root*
//! context; fibers run only when the root resumes them, and hand control
//! back with `yield_now()`. Nothing here is `Send`: fibers never leave the
//! thread that spawned them.
//!
//! # Scheduling pass
//!
//! A pass takes a snapshot of the ready queue and resumes each fiber in it
//! once. Fibers that yield during the pass go back on the queue for the
//! next one, so a pass always terminates whatever the queue order.
//!
//! # Cancellation
//!
//! Each fiber carries a `CancellationToken`. A fiber that resumes from
//! `yield_now()` with its token cancelled unwinds back to its entry, where
//! the unwind is caught and the fiber finishes as cancelled.

use std::cell::{Cell, RefCell, UnsafeCell};
use std::collections::HashMap;
use std::panic;
use std::ptr;
use std::rc::Rc;

use fiberpool_core::log::set_context;
use fiberpool_core::{
    fp_debug, fp_error, fp_trace, fp_warn, CancellationToken, FiberId, FiberState, SchedError,
    SchedResult, WorkerError,
};

use crate::arch::{self, Registers};
use crate::config::PoolConfig;
use crate::fiber::{install_unwind_hook, panic_message, Entry, Fiber, FiberCancelled, Outcome};
use crate::ready_queue::{ReadyPolicy, ReadyQueue};
use crate::stack::Stack;
use crate::tls;

thread_local! {
    static THREAD_SCHEDULER: RefCell<Option<Scheduler>> = const { RefCell::new(None) };
}

/// Counters kept by a scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub spawned: u64,
    pub finished: u64,
    pub switches: u64,
    pub passes: u64,
}

struct SchedulerCore {
    /// Root context, saved while a fiber runs
    root_regs: UnsafeCell<Registers>,
    fibers: RefCell<HashMap<FiberId, Rc<Fiber>>>,
    ready: RefCell<Box<dyn ReadyQueue>>,
    next_id: Cell<FiberId>,
    stack_size: usize,
    policy: ReadyPolicy,
    stats: Cell<SchedulerStats>,
}

/// Handle to this thread's scheduler
///
/// Cheap to clone; all clones drive the same fibers.
#[derive(Clone)]
pub struct Scheduler {
    core: Rc<SchedulerCore>,
}

impl Scheduler {
    /// This thread's scheduler, created from `PoolConfig::from_env()` on
    /// first use
    pub fn current() -> SchedResult<Scheduler> {
        THREAD_SCHEDULER
            .try_with(|slot| -> SchedResult<Scheduler> {
                let mut slot = slot.borrow_mut();
                if let Some(sched) = slot.as_ref() {
                    return Ok(sched.clone());
                }
                let config = PoolConfig::from_env();
                config.validate()?;
                let sched = Scheduler::build(&config);
                *slot = Some(sched.clone());
                Ok(sched)
            })
            .map_err(|_| SchedError::NotInitialized)?
    }

    /// Create this thread's scheduler with an explicit configuration
    ///
    /// Fails with `AlreadyInitialized` once the thread has a scheduler.
    pub fn init_current(config: &PoolConfig) -> SchedResult<Scheduler> {
        config.validate()?;
        THREAD_SCHEDULER
            .try_with(|slot| -> SchedResult<Scheduler> {
                let mut slot = slot.borrow_mut();
                if slot.is_some() {
                    return Err(SchedError::AlreadyInitialized);
                }
                let sched = Scheduler::build(config);
                *slot = Some(sched.clone());
                Ok(sched)
            })
            .map_err(|_| SchedError::NotInitialized)?
    }

    fn build(config: &PoolConfig) -> Scheduler {
        config.apply_logging();
        install_unwind_hook();
        fp_debug!(
            "scheduler created: policy={} stack_size={}",
            config.ready_policy,
            config.stack_size
        );
        Scheduler {
            core: Rc::new(SchedulerCore {
                root_regs: UnsafeCell::new(Registers::default()),
                fibers: RefCell::new(HashMap::new()),
                ready: RefCell::new(config.ready_policy.build()),
                next_id: Cell::new(FiberId::new(0)),
                stack_size: config.stack_size,
                policy: config.ready_policy,
                stats: Cell::new(SchedulerStats::default()),
            }),
        }
    }

    /// Spawn a fiber with its own token and the scheduler's stack size
    ///
    /// The fiber is queued ready and first runs on a later scheduling pass.
    pub fn spawn<F>(&self, f: F) -> SchedResult<JoinHandle>
    where
        F: FnOnce(&CancellationToken) + 'static,
    {
        self.spawn_with(CancellationToken::new(), self.core.stack_size, f)
    }

    /// Spawn a fiber with an explicit token and stack size
    pub fn spawn_with<F>(
        &self,
        token: CancellationToken,
        stack_size: usize,
        f: F,
    ) -> SchedResult<JoinHandle>
    where
        F: FnOnce(&CancellationToken) + 'static,
    {
        let core = &self.core;
        let id = core.next_id.get();
        let next = id.next().ok_or(WorkerError::NoIdsAvailable)?;

        let stack = Stack::new(stack_size)?;
        let entry: Entry = Box::new(f);
        let fiber = Fiber::new(id, token, stack, entry, core.root_regs.get());

        core.next_id.set(next);
        core.fibers.borrow_mut().insert(id, Rc::clone(&fiber));
        core.ready.borrow_mut().push(id);
        core.bump(|s| s.spawned += 1);
        fp_trace!("spawned {}", id);

        Ok(JoinHandle { sched: self.clone(), fiber })
    }

    /// Cooperative yield
    ///
    /// Inside a fiber: suspend until the next pass, then unwind if the
    /// fiber was cancelled meanwhile. On the root stack: run one pass.
    pub fn yield_now(&self) {
        if tls::is_in_fiber() {
            unsafe { suspend_current() };
            unwind_if_cancelled();
        } else {
            self.run_pass();
        }
    }

    /// Yield without observing cancellation
    pub(crate) fn yield_raw(&self) {
        if tls::is_in_fiber() {
            unsafe { suspend_current() };
        } else {
            self.run_pass();
        }
    }

    /// Resume every fiber that is ready right now, once
    ///
    /// Returns how many fibers were resumed. Does nothing (returns 0) when
    /// called from inside a fiber.
    pub fn run_pass(&self) -> usize {
        if tls::is_in_fiber() {
            return 0;
        }
        let core = &self.core;
        let batch: Vec<FiberId> = {
            let mut ready = core.ready.borrow_mut();
            let n = ready.len();
            (0..n).filter_map(|_| ready.pop()).collect()
        };

        let mut resumed = 0;
        for id in batch {
            let fiber = core.fibers.borrow().get(&id).cloned();
            match fiber {
                Some(fiber) if fiber.state() == FiberState::Ready => {
                    core.resume(&fiber);
                    resumed += 1;
                }
                _ => {}
            }
        }
        core.bump(|s| s.passes += 1);
        resumed
    }

    /// Run passes until no fiber is ready
    pub fn run_until_idle(&self) {
        while self.run_pass() > 0 {}
    }

    /// Run `f` as a fiber and drive the scheduler until it finishes
    ///
    /// A panic inside `f` resumes on the caller.
    pub fn block_on<F, T>(&self, f: F) -> SchedResult<T>
    where
        F: FnOnce() -> T + 'static,
        T: 'static,
    {
        let slot: Rc<Cell<Option<T>>> = Rc::new(Cell::new(None));
        let out = Rc::clone(&slot);
        let handle = self.spawn(move |_| out.set(Some(f())))?;
        self.wait_finished(&handle.fiber)?;

        match handle.fiber.take_outcome() {
            Some(Outcome::Completed) => slot.take().ok_or(SchedError::InvalidState),
            Some(Outcome::Panicked(payload)) => panic::resume_unwind(payload),
            _ => Err(SchedError::Cancelled),
        }
    }

    /// Wait (cooperatively) until `fiber` has finished
    fn wait_finished(&self, fiber: &Fiber) -> SchedResult<()> {
        if tls::current_fiber_id() == fiber.id {
            return Err(SchedError::InvalidState);
        }
        while !fiber.is_finished() {
            if tls::is_in_fiber() {
                unsafe { suspend_current() };
            } else if self.run_pass() == 0 && !fiber.is_finished() {
                // Not ready and not finished: nothing can ever resume it.
                fp_error!("{} cannot make progress", fiber.id);
                return Err(SchedError::InvalidState);
            }
        }
        Ok(())
    }

    /// Fibers spawned and not yet finished
    pub fn live_fibers(&self) -> usize {
        self.core.fibers.borrow().len()
    }

    pub fn ready_len(&self) -> usize {
        self.core.ready.borrow().len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.core.stats.get()
    }

    pub fn policy(&self) -> ReadyPolicy {
        self.core.policy
    }

    pub fn stack_size(&self) -> usize {
        self.core.stack_size
    }

    /// Whether both handles refer to the same scheduler
    pub fn same_as(&self, other: &Scheduler) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }
}

impl SchedulerCore {
    fn bump(&self, f: impl FnOnce(&mut SchedulerStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    /// Switch from the root into `fiber` and settle it when it comes back
    fn resume(&self, fiber: &Rc<Fiber>) {
        fiber.set_state(FiberState::Running);
        tls::set_current_fiber(Rc::as_ptr(fiber));
        set_context(fiber.id);

        unsafe { arch::switch_context(self.root_regs.get(), fiber.regs_ptr()) };

        tls::set_current_fiber(ptr::null());
        set_context(FiberId::NONE);
        self.bump(|s| s.switches += 1);

        match fiber.state() {
            FiberState::Ready => self.ready.borrow_mut().push(fiber.id),
            FiberState::Finished => {
                fiber.release_stack();
                self.fibers.borrow_mut().remove(&fiber.id);
                self.bump(|s| s.finished += 1);
                fp_trace!("{} finished", fiber.id);
            }
            FiberState::Running => fp_error!("{} switched out while running", fiber.id),
        }
    }
}

impl Drop for SchedulerCore {
    fn drop(&mut self) {
        let live = self.fibers.get_mut().len();
        if live > 0 {
            fp_warn!("scheduler dropped with {} unfinished fibers", live);
        }
    }
}

/// Suspend the running fiber back to its scheduler
///
/// # Safety
///
/// Must be called from inside a fiber.
unsafe fn suspend_current() {
    let fiber = tls::current_fiber_ptr();
    debug_assert!(!fiber.is_null());
    (*fiber).suspend();
}

/// Suspend the running fiber without observing cancellation; no-op on
/// the root stack
pub(crate) fn park_current() {
    if tls::is_in_fiber() {
        unsafe { suspend_current() };
    }
}

fn unwind_if_cancelled() {
    // A fiber already unwinding (a destructor that yields) must not start
    // a second unwind; siblings of such a fiber still may.
    if tls::current_cancelled() && !tls::current_unwinding() {
        tls::mark_current_unwinding();
        panic::resume_unwind(Box::new(FiberCancelled));
    }
}

/// Owned permission to wait for a fiber
///
/// Dropping the handle detaches the fiber; it keeps running.
pub struct JoinHandle {
    sched: Scheduler,
    fiber: Rc<Fiber>,
}

impl JoinHandle {
    pub fn id(&self) -> FiberId {
        self.fiber.id
    }

    pub fn is_finished(&self) -> bool {
        self.fiber.is_finished()
    }

    /// Ask the fiber to stop at its next `yield_now()`
    pub fn cancel(&self) {
        self.fiber.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.fiber.token
    }

    /// Wait for the fiber to finish
    ///
    /// Errors: `InvalidState` when a fiber joins itself, `Cancelled` when
    /// the fiber stopped because of cancellation, `FiberPanicked` with the
    /// panic message otherwise.
    pub fn join(self) -> SchedResult<()> {
        self.sched.wait_finished(&self.fiber)?;
        match self.fiber.take_outcome() {
            Some(Outcome::Completed) | None => Ok(()),
            Some(Outcome::Cancelled) => Err(SchedError::Cancelled),
            Some(Outcome::Panicked(payload)) => {
                Err(SchedError::FiberPanicked(panic_message(&*payload)))
            }
        }
    }

    /// Wait for the fiber, discarding how it ended
    pub(crate) fn join_quiet(self) -> SchedResult<()> {
        self.sched.wait_finished(&self.fiber)
    }
}

impl std::fmt::Debug for JoinHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.fiber.id)
            .field("state", &self.fiber.state())
            .finish()
    }
}

/// Spawn a fiber on this thread's scheduler
pub fn spawn<F>(f: F) -> SchedResult<JoinHandle>
where
    F: FnOnce(&CancellationToken) + 'static,
{
    Scheduler::current()?.spawn(f)
}

/// Cooperative yield on this thread's scheduler
///
/// Inside a fiber this suspends the fiber (and unwinds it if cancelled).
/// On the root stack it runs one scheduling pass, or falls back to an OS
/// yield when the thread has no scheduler.
pub fn yield_now() {
    if tls::is_in_fiber() {
        unsafe { suspend_current() };
        unwind_if_cancelled();
        return;
    }
    match THREAD_SCHEDULER.try_with(|slot| slot.borrow().clone()) {
        Ok(Some(sched)) => {
            sched.run_pass();
        }
        _ => std::thread::yield_now(),
    }
}

/// Run `f` as a fiber on this thread's scheduler until it finishes
pub fn block_on<F, T>(f: F) -> SchedResult<T>
where
    F: FnOnce() -> T + 'static,
    T: 'static,
{
    Scheduler::current()?.block_on(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_join() {
        let sched = Scheduler::current().unwrap();
        let hit = Rc::new(Cell::new(false));
        let h = Rc::clone(&hit);
        let handle = sched.spawn(move |_| h.set(true)).unwrap();
        assert!(!hit.get());
        handle.join().unwrap();
        assert!(hit.get());
        assert_eq!(sched.live_fibers(), 0);
    }

    #[test]
    fn test_fifo_interleaving() {
        let sched = Scheduler::current().unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut handles = Vec::new();
        for name in ['a', 'b'] {
            let log = Rc::clone(&log);
            handles.push(
                sched
                    .spawn(move |_| {
                        for i in 0..3 {
                            log.borrow_mut().push(format!("{}{}", name, i));
                            yield_now();
                        }
                    })
                    .unwrap(),
            );
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*log.borrow(), ["a0", "b0", "a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn test_block_on_value_and_nested_spawn() {
        let value = block_on(|| {
            let inner = spawn(|_| {
                yield_now();
            })
            .unwrap();
            inner.join().unwrap();
            40 + 2
        })
        .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_join_reports_panic() {
        let handle = spawn(|_| panic!("fiber exploded")).unwrap();
        match handle.join() {
            Err(SchedError::FiberPanicked(msg)) => assert_eq!(msg, "fiber exploded"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_cancel_unwinds_at_yield() {
        let dropped = Rc::new(Cell::new(false));
        let steps = Rc::new(Cell::new(0));

        struct Flag(Rc<Cell<bool>>);
        impl Drop for Flag {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let (d, s) = (Rc::clone(&dropped), Rc::clone(&steps));
        let handle = spawn(move |_| {
            let _flag = Flag(d);
            loop {
                s.set(s.get() + 1);
                yield_now();
            }
        })
        .unwrap();

        let sched = Scheduler::current().unwrap();
        sched.run_pass();
        sched.run_pass();
        handle.cancel();
        assert_eq!(handle.join(), Err(SchedError::Cancelled));
        assert!(dropped.get());
        assert_eq!(steps.get(), 2);
    }

    #[test]
    fn test_cancel_before_start_skips_body() {
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        let handle = spawn(move |_| r.set(true)).unwrap();
        handle.cancel();
        assert_eq!(handle.join(), Err(SchedError::Cancelled));
        assert!(!ran.get());
    }

    #[test]
    fn test_self_join_rejected() {
        let sched = Scheduler::current().unwrap();
        let slot: Rc<RefCell<Option<JoinHandle>>> = Rc::new(RefCell::new(None));
        let result = Rc::new(Cell::new(None));

        let (s, r) = (Rc::clone(&slot), Rc::clone(&result));
        let handle = sched
            .spawn(move |_| {
                yield_now();
                if let Some(me) = s.borrow_mut().take() {
                    r.set(Some(me.join()));
                }
            })
            .unwrap();
        let id = handle.id();
        *slot.borrow_mut() = Some(handle);

        sched.run_until_idle();
        assert_eq!(result.take(), Some(Err(SchedError::InvalidState)));
        assert!(id.is_some());
        assert_eq!(sched.live_fibers(), 0);
    }

    #[test]
    fn test_root_yield_runs_a_pass() {
        let sched = Scheduler::current().unwrap();
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let handle = sched.spawn(move |_| c.set(c.get() + 1)).unwrap();
        yield_now();
        assert_eq!(count.get(), 1);
        assert!(handle.is_finished());
    }

    #[test]
    fn test_lifo_pass_starves_no_one() {
        std::thread::spawn(|| {
            let sched = Scheduler::init_current(
                &PoolConfig::new().ready_policy(ReadyPolicy::Lifo),
            )
            .unwrap();
            assert_eq!(sched.policy(), ReadyPolicy::Lifo);

            let seen = Rc::new(RefCell::new(Vec::new()));
            for i in 0..3 {
                let seen = Rc::clone(&seen);
                sched
                    .spawn(move |_| {
                        seen.borrow_mut().push(i);
                        yield_now();
                        seen.borrow_mut().push(i + 10);
                    })
                    .unwrap();
            }
            assert_eq!(sched.run_pass(), 3);
            assert_eq!(*seen.borrow(), [2, 1, 0]);
            sched.run_until_idle();
            assert_eq!(seen.borrow().len(), 6);
            assert!(matches!(
                Scheduler::init_current(&PoolConfig::new()),
                Err(SchedError::AlreadyInitialized)
            ));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_stats_and_stack_release() {
        let sched = Scheduler::current().unwrap();
        let before = sched.stats();
        let h = sched.spawn(|_| yield_now()).unwrap();
        h.join().unwrap();
        let after = sched.stats();
        assert_eq!(after.spawned - before.spawned, 1);
        assert_eq!(after.finished - before.finished, 1);
        assert!(after.switches - before.switches >= 2);
    }
}
