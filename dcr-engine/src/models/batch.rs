//! Staging batch state machine
//!
//! queued → running → {succeeded, failed, cancelled}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Persisted, waiting for its task to start
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Running => "running",
            BatchStatus::Succeeded => "succeeded",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Succeeded | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }

    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Queued, BatchStatus::Running)
                | (BatchStatus::Queued, BatchStatus::Failed)
                | (BatchStatus::Queued, BatchStatus::Cancelled)
                | (BatchStatus::Running, BatchStatus::Succeeded)
                | (BatchStatus::Running, BatchStatus::Failed)
                | (BatchStatus::Running, BatchStatus::Cancelled)
        )
    }

    /// Task status as exposed to the admin UI
    pub fn wire_state(&self) -> TaskState {
        match self {
            BatchStatus::Queued => TaskState::Pending,
            BatchStatus::Running => TaskState::Running,
            BatchStatus::Succeeded => TaskState::Success,
            BatchStatus::Failed | BatchStatus::Cancelled => TaskState::Error,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(BatchStatus::Queued),
            "running" => Ok(BatchStatus::Running),
            "succeeded" => Ok(BatchStatus::Succeeded),
            "failed" => Ok(BatchStatus::Failed),
            "cancelled" => Ok(BatchStatus::Cancelled),
            other => Err(format!("unknown batch status: {}", other)),
        }
    }
}

/// `estado` values of the task status contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Running,
    Success,
    Error,
}

/// Matching progress, persisted so polling survives restarts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
    pub percentage: f64,
}

impl BatchProgress {
    pub fn new(processed: usize, total: usize) -> Self {
        let percentage = if total > 0 {
            (processed as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        Self {
            processed,
            total,
            percentage,
        }
    }
}

/// Batch header (listings and results are loaded separately)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingBatch {
    pub batch_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub status: BatchStatus,
    /// Sales channel whose prices are diffed
    pub channel: String,
    pub progress: BatchProgress,
    /// Set when the run stopped before every listing was matched
    pub incomplete: bool,
    pub applied_count: i64,
    pub error_message: Option<String>,
    /// Batch whose stored listings were replayed to create this one
    pub source_batch_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StagingBatch {
    pub fn new(channel: String, total: usize, source_batch_id: Option<Uuid>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            created_at: Utc::now(),
            status: BatchStatus::Queued,
            channel,
            progress: BatchProgress::new(0, total),
            incomplete: false,
            applied_count: 0,
            error_message: None,
            source_batch_id,
            started_at: None,
            ended_at: None,
        }
    }
}

/// One persisted log line of a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchLogLine {
    pub seq: i64,
    pub level: String,
    pub message: String,
    pub logged_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_successors() {
        for terminal in [
            BatchStatus::Succeeded,
            BatchStatus::Failed,
            BatchStatus::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(BatchStatus::Running));
        }
        assert!(BatchStatus::Queued.can_transition_to(BatchStatus::Running));
        assert!(!BatchStatus::Queued.can_transition_to(BatchStatus::Succeeded));
    }

    #[test]
    fn wire_state_mapping() {
        assert_eq!(BatchStatus::Queued.wire_state(), TaskState::Pending);
        assert_eq!(BatchStatus::Succeeded.wire_state(), TaskState::Success);
        assert_eq!(BatchStatus::Cancelled.wire_state(), TaskState::Error);
        assert_eq!(
            serde_json::to_string(&TaskState::Success).unwrap(),
            "\"SUCCESS\""
        );
    }

    #[test]
    fn progress_percentage() {
        assert_eq!(BatchProgress::new(0, 0).percentage, 0.0);
        assert_eq!(BatchProgress::new(1, 4).percentage, 25.0);
    }
}
