use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::UtcDateTime;

/// Lifecycle of a remote transcription job.
///
/// `Submitted -> Processing -> Completed | Error`, with `Cancelled` and
/// `Timeout` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Processing,
    Completed,
    Error,
    Cancelled,
    Timeout,
}

impl JobStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Error | Self::Cancelled | Self::Timeout
        )
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Submitted, Self::Submitted | Self::Processing) => true,
            (Self::Processing, Self::Processing) => true,
            (Self::Submitted | Self::Processing, Self::Completed | Self::Error) => true,
            (Self::Submitted | Self::Processing, Self::Cancelled | Self::Timeout) => true,
            _ => false,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

/// Adaptive polling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollingConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_attempts: u32,
    pub rate_limit_factor: f64,
    pub drift_factor: f64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(2_000),
            max_interval: Duration::from_millis(10_000),
            max_attempts: 300,
            rate_limit_factor: 1.5,
            drift_factor: 1.05,
        }
    }
}

/// Book-keeping for one active job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionJob {
    pub id: String,
    pub status: JobStatus,
    pub audio_url: String,
    pub created_at: UtcDateTime,
    pub attempts: u32,
    pub cancel_requested: bool,
}

impl TranscriptionJob {
    pub fn new(id: impl Into<String>, audio_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Submitted,
            audio_url: audio_url.into(),
            created_at: UtcDateTime::now(),
            attempts: 0,
            cancel_requested: false,
        }
    }

    /// Moves to `next` when the transition is legal; returns whether it happened.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_accept_no_transitions() {
        for terminal in [
            JobStatus::Completed,
            JobStatus::Error,
            JobStatus::Cancelled,
            JobStatus::Timeout,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(JobStatus::Processing));
            assert!(!terminal.can_transition_to(JobStatus::Completed));
        }
    }

    #[test]
    fn processing_cannot_return_to_submitted() {
        let mut job = TranscriptionJob::new("job-1", "https://cdn.test/audio");

        assert!(job.transition(JobStatus::Processing));
        assert!(!job.transition(JobStatus::Submitted));
        assert!(job.transition(JobStatus::Completed));
        assert!(!job.transition(JobStatus::Cancelled));
        assert_eq!(job.status, JobStatus::Completed);
    }
}
