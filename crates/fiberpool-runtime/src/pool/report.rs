//! What a dispatch round hands back

use fiberpool_core::{SchedError, SchedResult, TaskFailure};

/// How one task invocation (one worker index) ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(TaskFailure),
}

impl TaskOutcome {
    #[inline]
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed)
    }
}

/// Result of one `concurrent_for` round
///
/// `outcomes[i]` belongs to the invocation that received index `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundReport {
    round: u64,
    reused: bool,
    outcomes: Vec<TaskOutcome>,
}

impl RoundReport {
    pub(crate) fn new(round: u64, reused: bool, outcomes: Vec<TaskOutcome>) -> Self {
        Self { round, reused, outcomes }
    }

    /// Sequence number of this round on its pool, starting at 1
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Whether the round ran on the previous round's workers
    pub fn reused_workers(&self) -> bool {
        self.reused
    }

    pub fn workers(&self) -> usize {
        self.outcomes.len()
    }

    pub fn outcomes(&self) -> &[TaskOutcome] {
        &self.outcomes
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(TaskOutcome::is_completed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskFailure> {
        self.outcomes.iter().filter_map(|o| match o {
            TaskOutcome::Failed(f) => Some(f),
            TaskOutcome::Completed => None,
        })
    }

    /// `Ok(())` if every invocation completed, else `TaskFailed` listing
    /// the failures in index order
    pub fn into_result(self) -> SchedResult<()> {
        let failures: Vec<TaskFailure> = self
            .outcomes
            .into_iter()
            .filter_map(|o| match o {
                TaskOutcome::Failed(f) => Some(f),
                TaskOutcome::Completed => None,
            })
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SchedError::TaskFailed(failures))
        }
    }
}

/// Lifetime counters of a fiber pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Rounds that ran to completion
    pub rounds: u64,
    pub workers_spawned: u64,
    pub workers_joined: u64,
    /// Times the worker set was replaced because the size changed
    pub resizes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_success() {
        let report = RoundReport::new(1, false, vec![TaskOutcome::Completed; 3]);
        assert!(report.is_success());
        assert_eq!(report.workers(), 3);
        assert_eq!(report.failures().count(), 0);
        assert_eq!(report.into_result(), Ok(()));
    }

    #[test]
    fn test_report_failures_in_index_order() {
        let report = RoundReport::new(
            4,
            true,
            vec![
                TaskOutcome::Completed,
                TaskOutcome::Failed(TaskFailure::new(1, "one")),
                TaskOutcome::Completed,
                TaskOutcome::Failed(TaskFailure::new(3, "three")),
            ],
        );
        assert!(!report.is_success());
        assert!(report.reused_workers());
        assert_eq!(report.round(), 4);
        match report.into_result() {
            Err(SchedError::TaskFailed(f)) => {
                assert_eq!(f.iter().map(|f| f.worker).collect::<Vec<_>>(), [1, 3]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
