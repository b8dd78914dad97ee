//! Fiber identifier type

use core::fmt;

use crate::constants::FIBER_NONE;

/// Identifier of a fiber within its thread's scheduler.
///
/// Ids are handed out monotonically and never reused while the scheduler
/// lives, so two workers with the same id are the same fiber.
/// `u32::MAX` is reserved as the "no fiber" sentinel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FiberId(u32);

impl FiberId {
    /// Sentinel value indicating no fiber (the thread's root context)
    pub const NONE: FiberId = FiberId(FIBER_NONE);

    #[inline]
    pub const fn new(id: u32) -> Self {
        FiberId(id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == FIBER_NONE
    }

    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != FIBER_NONE
    }

    /// The id that follows this one, or `None` once the id space is spent
    #[inline]
    pub const fn next(self) -> Option<FiberId> {
        if self.0 + 1 >= FIBER_NONE {
            None
        } else {
            Some(FiberId(self.0 + 1))
        }
    }
}

impl From<u32> for FiberId {
    #[inline]
    fn from(id: u32) -> Self {
        FiberId(id)
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "FiberId(NONE)")
        } else {
            write!(f, "FiberId({})", self.0)
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "root")
        } else {
            write!(f, "fiber {}", self.0)
        }
    }
}

impl Default for FiberId {
    fn default() -> Self {
        FiberId::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fiber_id_basics() {
        let id = FiberId::new(7);
        assert_eq!(id.as_u32(), 7);
        assert!(id.is_some());
        assert_eq!(id.next(), Some(FiberId::new(8)));
        assert_eq!(format!("{}", id), "fiber 7");
    }

    #[test]
    fn test_fiber_id_none() {
        assert!(FiberId::NONE.is_none());
        assert!(FiberId::default().is_none());
        assert_eq!(format!("{}", FiberId::NONE), "root");
        assert_eq!(FiberId::new(FIBER_NONE - 1).next(), None);
    }
}
