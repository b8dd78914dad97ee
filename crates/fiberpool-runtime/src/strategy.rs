//! Common interface of the pool strategies
//!
//! `Pool` runs every index on a fiber of the calling thread; `SharedWorkPool`
//! hands indices to a set of OS threads. Code written against
//! `ConcurrentFor` works with either.

use fiberpool_core::SchedResult;

use crate::pool::RoundReport;

pub trait ConcurrentFor {
    /// Invoke `task(i)` once for every `i` in `0..n`, returning after all
    /// invocations have finished
    ///
    /// `Sync` is required so that the same task can be used with
    /// strategies that call it from several threads.
    fn concurrent_for<F>(&self, n: usize, task: F) -> SchedResult<RoundReport>
    where
        F: Fn(usize) + Sync;
}
