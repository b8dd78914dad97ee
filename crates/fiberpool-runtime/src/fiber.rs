//! Fiber records and the code that runs on a fiber's own stack
//!
//! A `Fiber` is owned by its scheduler (and by any `JoinHandle`) through an
//! `Rc`. The raw pointer handed to the new context stays valid because the
//! scheduler holds a strong reference for as long as the fiber can run.

use std::any::Any;
use std::cell::{Cell, UnsafeCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Once;

use fiberpool_core::{CancellationToken, FiberId, FiberState};

use crate::arch::{self, Registers};
use crate::stack::Stack;
use crate::tls;

thread_local! {
    /// Fibers of this thread currently marked as unwinding
    static UNWINDING: Cell<usize> = const { Cell::new(0) };
}

static UNWIND_HOOK: Once = Once::new();

/// Chain a panic hook that marks the panicking fiber as unwinding
///
/// `std::thread::panicking()` is shared by every fiber of a thread, so the
/// mark is what tells a fiber apart from a sibling suspended mid-unwind.
pub(crate) fn install_unwind_hook() {
    UNWIND_HOOK.call_once(|| {
        let prev = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let fiber = tls::current_fiber_ptr();
            if !fiber.is_null() {
                unsafe { (*fiber).mark_unwinding() };
            }
            prev(info);
        }));
    });
}

/// Panic payload used to unwind a fiber that observed cancellation
pub(crate) struct FiberCancelled;

/// How a fiber's body ended
pub(crate) enum Outcome {
    Completed,
    Cancelled,
    Panicked(Box<dyn Any + Send>),
}

pub(crate) type Entry = Box<dyn FnOnce(&CancellationToken) + 'static>;

pub(crate) struct Fiber {
    pub(crate) id: FiberId,
    pub(crate) token: CancellationToken,
    regs: UnsafeCell<Registers>,
    /// Context to return to when this fiber suspends (its scheduler's root)
    root: *mut Registers,
    state: Cell<FiberState>,
    unwinding: Cell<bool>,
    stack: Cell<Option<Stack>>,
    entry: Cell<Option<Entry>>,
    outcome: Cell<Option<Outcome>>,
}

impl Fiber {
    /// Build a fiber whose first resume runs `entry` on `stack`
    pub(crate) fn new(
        id: FiberId,
        token: CancellationToken,
        stack: Stack,
        entry: Entry,
        root: *mut Registers,
    ) -> Rc<Self> {
        let top = stack.top();
        let fiber = Rc::new(Self {
            id,
            token,
            regs: UnsafeCell::new(Registers::default()),
            root,
            state: Cell::new(FiberState::Ready),
            unwinding: Cell::new(false),
            stack: Cell::new(Some(stack)),
            entry: Cell::new(Some(entry)),
            outcome: Cell::new(None),
        });
        unsafe {
            arch::init_context(fiber.regs.get(), top, fiber_entry, Rc::as_ptr(&fiber) as usize);
        }
        fiber
    }

    #[inline]
    pub(crate) fn state(&self) -> FiberState {
        self.state.get()
    }

    #[inline]
    pub(crate) fn set_state(&self, state: FiberState) {
        self.state.set(state);
    }

    #[inline]
    pub(crate) fn is_finished(&self) -> bool {
        self.state.get().is_terminated()
    }

    #[inline]
    pub(crate) fn regs_ptr(&self) -> *const Registers {
        self.regs.get()
    }

    /// Unmap the stack of a finished fiber
    pub(crate) fn release_stack(&self) {
        debug_assert!(self.is_finished());
        drop(self.stack.take());
    }

    pub(crate) fn mark_unwinding(&self) {
        if !self.unwinding.replace(true) {
            UNWINDING.with(|n| n.set(n.get() + 1));
        }
    }

    pub(crate) fn clear_unwinding(&self) {
        if self.unwinding.replace(false) {
            UNWINDING.with(|n| n.set(n.get() - 1));
        }
    }

    /// Whether this fiber's own stack is being unwound
    ///
    /// A panic that bypassed the hook (a later `set_hook` replaced it)
    /// leaves no mark anywhere; then any thread-wide panic counts.
    pub(crate) fn is_unwinding(&self) -> bool {
        if !std::thread::panicking() {
            // a caught panic left a stale mark
            self.clear_unwinding();
            return false;
        }
        self.unwinding.get() || UNWINDING.with(|n| n.get()) == 0
    }

    pub(crate) fn take_outcome(&self) -> Option<Outcome> {
        self.outcome.take()
    }

    /// Switch from this (running) fiber back to the scheduler
    ///
    /// # Safety
    ///
    /// Must be called on this fiber's own stack.
    pub(crate) unsafe fn suspend(&self) {
        self.state.set(FiberState::Ready);
        arch::switch_context(self.regs.get(), self.root);
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        // Never started: the entry closure is still here and drops normally.
        // Started but unfinished: whatever lived on its stack is leaked.
        if self.state.get() != FiberState::Finished && self.entry.get_mut().is_none() {
            fiberpool_core::fp_warn!("{} dropped before finishing", self.id);
        }
    }
}

extern "C" fn fiber_entry(arg: usize) {
    let fiber = arg as *const Fiber;
    unsafe {
        run_body(&*fiber);
        finish(fiber)
    }
}

fn run_body(fiber: &Fiber) {
    let outcome = match fiber.entry.take() {
        Some(entry) if !fiber.token.is_cancelled() => {
            let result = panic::catch_unwind(AssertUnwindSafe(|| entry(&fiber.token)));
            fiber.clear_unwinding();
            match result {
                Ok(()) => Outcome::Completed,
                Err(payload) if payload.is::<FiberCancelled>() => Outcome::Cancelled,
                Err(payload) => Outcome::Panicked(payload),
            }
        }
        _ => Outcome::Cancelled,
    };
    fiber.outcome.set(Some(outcome));
}

/// Mark finished and leave for good; the scheduler frees the stack
unsafe fn finish(fiber: *const Fiber) -> ! {
    let fiber = &*fiber;
    fiber.clear_unwinding();
    fiber.state.set(FiberState::Finished);
    arch::switch_context(fiber.regs.get(), fiber.root);
    std::process::abort()
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static msg");
        assert_eq!(panic_message(&*payload), "static msg");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned msg"));
        assert_eq!(panic_message(&*payload), "owned msg");

        let payload: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }
}
