//! Cancellation token for cooperative cancellation
//!
//! Every fiber receives a token. Pools hand their workers a token derived
//! from the pool generation, so cancelling the generation reaches every
//! worker the next time it checks. Cancellation is monotonic: a token that
//! has been cancelled stays cancelled.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{SchedError, SchedResult};

/// Token for checking and triggering cancellation
///
/// Clones share state. Tokens may have a parent; a child reports cancelled
/// once either it or any ancestor was cancelled.
#[derive(Clone)]
pub struct CancellationToken {
    inner: CancellationInner,
}

#[derive(Clone)]
enum CancellationInner {
    Owned(Arc<OwnedCancellation>),
    /// Token that never cancels (root-context callers)
    Never,
}

struct OwnedCancellation {
    cancelled: AtomicBool,
    parent: Option<CancellationToken>,
}

impl CancellationToken {
    /// Create a new independent cancellation token
    pub fn new() -> Self {
        Self {
            inner: CancellationInner::Owned(Arc::new(OwnedCancellation {
                cancelled: AtomicBool::new(false),
                parent: None,
            })),
        }
    }

    /// Create a token that never reports cancellation
    pub fn never() -> Self {
        Self { inner: CancellationInner::Never }
    }

    /// Create a child token linked to this one
    ///
    /// Cancelling the child does not affect this token.
    pub fn child(&self) -> Self {
        Self {
            inner: CancellationInner::Owned(Arc::new(OwnedCancellation {
                cancelled: AtomicBool::new(false),
                parent: Some(self.clone()),
            })),
        }
    }

    /// Check if cancellation was requested here or on any ancestor
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        match &self.inner {
            CancellationInner::Owned(arc) => {
                if arc.cancelled.load(Ordering::Acquire) {
                    return true;
                }
                match arc.parent {
                    Some(ref parent) => parent.is_cancelled(),
                    None => false,
                }
            }
            CancellationInner::Never => false,
        }
    }

    /// Request cancellation
    ///
    /// Only this token's flag is set; children observe it through the
    /// parent link.
    pub fn cancel(&self) {
        if let CancellationInner::Owned(arc) = &self.inner {
            arc.cancelled.store(true, Ordering::Release);
        }
    }

    /// Return `Err(SchedError::Cancelled)` if cancelled
    ///
    /// ```ignore
    /// fn step(token: &CancellationToken) -> SchedResult<()> {
    ///     token.check()?;
    ///     // ... do work ...
    ///     Ok(())
    /// }
    /// ```
    #[inline]
    pub fn check(&self) -> SchedResult<()> {
        if self.is_cancelled() {
            Err(SchedError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_cancellation() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());

        token.cancel();

        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(SchedError::Cancelled)));
    }

    #[test]
    fn test_child_sees_parent() {
        let generation = CancellationToken::new();
        let worker = generation.child();
        assert!(!worker.is_cancelled());

        generation.cancel();
        assert!(worker.is_cancelled());
    }

    #[test]
    fn test_child_cancel_is_local() {
        let parent = CancellationToken::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_cancel_is_sticky_across_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        token.cancel();
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_never_token() {
        let token = CancellationToken::never();
        token.cancel();
        assert!(!token.is_cancelled());
        assert!(!token.child().is_cancelled());
    }
}
