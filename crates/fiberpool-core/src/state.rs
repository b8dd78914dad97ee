//! Fiber and pool lifecycle states

use core::fmt;

/// State of a fiber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FiberState {
    /// In the ready queue, waiting for a scheduling pass
    Ready = 0,

    /// Currently executing (at most one fiber per thread)
    Running = 1,

    /// Entry returned; stack released, outcome available to join
    Finished = 2,
}

impl FiberState {
    /// Check if this state allows the fiber to be scheduled
    #[inline]
    pub const fn is_runnable(&self) -> bool {
        matches!(self, FiberState::Ready)
    }

    #[inline]
    pub const fn is_terminated(&self) -> bool {
        matches!(self, FiberState::Finished)
    }
}

/// Lifecycle of a fiber pool
///
/// ```text
/// Uninitialized -> Idle -> Dispatching -> Idle -> ... -> Cancelling -> Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PoolState {
    /// No workers spawned yet
    Uninitialized = 0,

    /// Workers alive, no round in flight
    Idle = 1,

    /// A round is in flight
    Dispatching = 2,

    /// Workers are being cancelled and joined
    Cancelling = 3,

    /// All workers joined; the pool will not run further rounds
    Terminated = 4,
}

impl PoolState {
    /// Check if a new round may be started from this state
    #[inline]
    pub const fn accepts_dispatch(&self) -> bool {
        matches!(self, PoolState::Uninitialized | PoolState::Idle)
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolState::Uninitialized => write!(f, "uninitialized"),
            PoolState::Idle => write!(f, "idle"),
            PoolState::Dispatching => write!(f, "dispatching"),
            PoolState::Cancelling => write!(f, "cancelling"),
            PoolState::Terminated => write!(f, "terminated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fiber_states() {
        assert!(FiberState::Ready.is_runnable());
        assert!(!FiberState::Running.is_runnable());
        assert!(FiberState::Finished.is_terminated());
        assert!(!FiberState::Ready.is_terminated());
    }

    #[test]
    fn test_pool_dispatch_gate() {
        assert!(PoolState::Uninitialized.accepts_dispatch());
        assert!(PoolState::Idle.accepts_dispatch());
        assert!(!PoolState::Dispatching.accepts_dispatch());
        assert!(!PoolState::Cancelling.accepts_dispatch());
        assert!(!PoolState::Terminated.accepts_dispatch());
        assert_eq!(PoolState::Dispatching.to_string(), "dispatching");
    }
}
