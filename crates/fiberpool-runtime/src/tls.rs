//! Thread-local storage for fiber context
//!
//! Const-initialised cells with no destructor, so they stay readable while
//! other thread locals are being torn down.

use std::cell::Cell;
use std::ptr;

use fiberpool_core::{CancellationToken, FiberId};

use crate::fiber::Fiber;

thread_local! {
    /// Fiber executing on this thread, null while on the root stack
    static CURRENT_FIBER: Cell<*const Fiber> = const { Cell::new(ptr::null()) };
}

#[inline]
pub(crate) fn set_current_fiber(fiber: *const Fiber) {
    CURRENT_FIBER.with(|cell| cell.set(fiber));
}

#[inline]
pub(crate) fn current_fiber_ptr() -> *const Fiber {
    CURRENT_FIBER.with(|cell| cell.get())
}

/// Check if we're running inside a fiber
#[inline]
pub fn is_in_fiber() -> bool {
    !current_fiber_ptr().is_null()
}

/// Id of the running fiber, `FiberId::NONE` on the root stack
#[inline]
pub fn current_fiber_id() -> FiberId {
    let fiber = current_fiber_ptr();
    if fiber.is_null() {
        FiberId::NONE
    } else {
        // The scheduler keeps the record alive while the fiber runs.
        unsafe { (*fiber).id }
    }
}

/// Token of the running fiber; root callers get one that never cancels
pub fn current_token() -> CancellationToken {
    let fiber = current_fiber_ptr();
    if fiber.is_null() {
        CancellationToken::never()
    } else {
        unsafe { (*fiber).token.clone() }
    }
}

/// Whether the running fiber has been asked to cancel
#[inline]
pub(crate) fn current_cancelled() -> bool {
    let fiber = current_fiber_ptr();
    !fiber.is_null() && unsafe { (*fiber).token.is_cancelled() }
}

/// Mark the running fiber as unwinding; no-op on the root stack
#[inline]
pub(crate) fn mark_current_unwinding() {
    let fiber = current_fiber_ptr();
    if !fiber.is_null() {
        unsafe { (*fiber).mark_unwinding() };
    }
}

/// The running fiber's unwind finished (it was caught)
#[inline]
pub(crate) fn clear_current_unwinding() {
    let fiber = current_fiber_ptr();
    if !fiber.is_null() {
        unsafe { (*fiber).clear_unwinding() };
    }
}

/// Whether the running context is unwinding its own stack
pub(crate) fn current_unwinding() -> bool {
    let fiber = current_fiber_ptr();
    if fiber.is_null() {
        std::thread::panicking()
    } else {
        unsafe { (*fiber).is_unwinding() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_context() {
        assert!(!is_in_fiber());
        assert!(current_fiber_id().is_none());
        assert!(!current_token().is_cancelled());
        assert!(!current_cancelled());
        assert!(!current_unwinding());
    }
}
