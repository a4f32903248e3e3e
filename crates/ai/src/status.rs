use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use closet_core::DomainError;

/// Lifecycle state of an AI job.
///
/// ```text
/// PENDING -> RUNNING -> SUCCEEDED | FAILED | NEEDS_REVIEW
/// RUNNING -> PENDING                 (retry, while attempts remain)
/// SUCCEEDED | NEEDS_REVIEW -> APPLIED
/// ```
///
/// FAILED and APPLIED are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    NeedsReview,
    Applied,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::NeedsReview,
        JobStatus::Applied,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::NeedsReview => "NEEDS_REVIEW",
            JobStatus::Applied => "APPLIED",
        }
    }

    /// Whether the edge `self -> next` exists in the state machine.
    ///
    /// The retry edge (`RUNNING -> PENDING`) is additionally gated on attempts
    /// by [`crate::AiJob`].
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, NeedsReview)
                | (Running, Pending)
                | (Succeeded, Applied)
                | (NeedsReview, Applied)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Applied)
    }

    /// Statuses whose result may be applied to an item.
    pub fn is_applicable(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::NeedsReview)
    }

    /// Statuses that may carry a result.
    pub fn carries_result(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::NeedsReview | JobStatus::Applied
        )
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<_> = JobStatus::ALL.iter().map(|st| st.as_str()).collect();
                DomainError::validation(format!("status must be one of: {}", names.join(", ")))
            })
    }
}

/// A rejected status change.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("illegal transition {from} -> {to}")]
    Illegal { from: JobStatus, to: JobStatus },

    #[error("attempts exhausted ({attempts}/{max_attempts})")]
    AttemptsExhausted { attempts: u32, max_attempts: u32 },

    #[error("job has no result")]
    MissingResult,
}
