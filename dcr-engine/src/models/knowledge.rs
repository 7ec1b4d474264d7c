//! Knowledge Base records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::MatchAlgorithm;

/// Learned mapping from a listing signature to a catalog capacity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub signature: String,
    pub capacity_id: i64,
    pub confidence: u8,
    pub times_confirmed: u32,
    pub times_corrected: u32,
    pub user_validated: bool,
    /// Phase that first produced the mapping
    pub algorithm: MatchAlgorithm,
    pub last_confirmed_at: Option<DateTime<Utc>>,
    pub last_corrected_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Kind of mutation recorded in the knowledge history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeEvent {
    Learned,
    Confirmed,
    Corrected,
    Created,
    Propagated,
}

impl KnowledgeEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeEvent::Learned => "learned",
            KnowledgeEvent::Confirmed => "confirmed",
            KnowledgeEvent::Corrected => "corrected",
            KnowledgeEvent::Created => "created",
            KnowledgeEvent::Propagated => "propagated",
        }
    }
}

impl FromStr for KnowledgeEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "learned" => Ok(KnowledgeEvent::Learned),
            "confirmed" => Ok(KnowledgeEvent::Confirmed),
            "corrected" => Ok(KnowledgeEvent::Corrected),
            "created" => Ok(KnowledgeEvent::Created),
            "propagated" => Ok(KnowledgeEvent::Propagated),
            other => Err(format!("unknown knowledge event: {}", other)),
        }
    }
}

/// Aggregates over the whole Knowledge Base, computed on read
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeMetrics {
    pub entries: usize,
    pub user_validated: usize,
    pub avg_confidence: f64,
    pub total_confirmations: u64,
    pub total_corrections: u64,
}
