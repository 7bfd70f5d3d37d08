//! Job status state machine.

use serde::{Deserialize, Serialize};

/// Job processing status.
///
/// Transitions form a directed graph; the only cycles are the explicit
/// retry (`Failed -> Queued`) and restart (`Cancelled -> Queued`) edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created but not yet submitted
    #[default]
    Pending,
    /// Waiting for the worker
    Queued,
    /// Inside a processor call
    Processing,
    /// Output written successfully
    Completed,
    /// Failed with an error message
    Failed,
    /// Cancelled by the caller or by shutdown
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Statuses reachable in one step.
    pub fn allowed_transitions(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[JobStatus::Queued, JobStatus::Cancelled],
            JobStatus::Queued => &[JobStatus::Processing, JobStatus::Cancelled],
            JobStatus::Processing => &[
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ],
            JobStatus::Completed => &[],
            JobStatus::Failed => &[JobStatus::Queued],
            JobStatus::Cancelled => &[JobStatus::Queued],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// Check if this is a terminal state (no automatic updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Queued or processing.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_cannot_jump_to_completed() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Queued));
    }

    #[test]
    fn test_completed_is_final() {
        for next in JobStatus::ALL {
            assert!(!JobStatus::Completed.can_transition_to(next));
        }
    }

    #[test]
    fn test_retry_edges() {
        assert!(JobStatus::Failed.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Cancelled.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn test_terminal_and_active_are_disjoint() {
        for status in JobStatus::ALL {
            assert!(!(status.is_terminal() && status.is_active()));
        }
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Pending.is_active());
    }

    #[test]
    fn test_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }
}
