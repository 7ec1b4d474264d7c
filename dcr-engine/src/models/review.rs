//! Human review decisions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approve,
    Reject,
    Correct,
    CreateNew,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Approve => "approve",
            DecisionKind::Reject => "reject",
            DecisionKind::Correct => "correct",
            DecisionKind::CreateNew => "create_new",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(DecisionKind::Approve),
            "reject" => Ok(DecisionKind::Reject),
            "correct" => Ok(DecisionKind::Correct),
            "create_new" => Ok(DecisionKind::CreateNew),
            other => Err(format!("unknown decision: {}", other)),
        }
    }
}

/// Per-listing review state inside a batch
///
/// pending → auto_mapped (propagation) → resolved. `auto_mapped` listings are
/// out of the review queue but still accept an explicit decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Pending,
    AutoMapped,
    Resolved,
}

impl ReviewState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewState::Pending => "pending",
            ReviewState::AutoMapped => "auto_mapped",
            ReviewState::Resolved => "resolved",
        }
    }

    pub fn accepts_decision(&self) -> bool {
        !matches!(self, ReviewState::Resolved)
    }
}

impl FromStr for ReviewState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ReviewState::Pending),
            "auto_mapped" => Ok(ReviewState::AutoMapped),
            "resolved" => Ok(ReviewState::Resolved),
            other => Err(format!("unknown review state: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub staging_item_id: i64,
    pub decision: DecisionKind,
    pub target_capacity_id: Option<i64>,
    pub notes: Option<String>,
    pub decided_at: DateTime<Utc>,
}
