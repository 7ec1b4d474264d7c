//! Change records derived from match results and current catalog prices

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{MatchAlgorithm, Price};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    Noop,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
            ChangeKind::Noop => "NOOP",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INSERT" => Ok(ChangeKind::Insert),
            "UPDATE" => Ok(ChangeKind::Update),
            "DELETE" => Ok(ChangeKind::Delete),
            "NOOP" => Ok(ChangeKind::Noop),
            other => Err(format!("unknown change kind: {}", other)),
        }
    }
}

/// One entry of a batch change-set
///
/// Carries no timestamps or generated ids so that re-running an unchanged feed
/// against an unchanged catalog reproduces it exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Listing that produced the change; `None` for DELETE records
    pub staging_item_id: Option<i64>,
    pub kind: ChangeKind,
    pub modelo_norm: String,
    #[serde(rename = "capacidad_id")]
    pub capacity_id: i64,
    #[serde(rename = "antes")]
    pub before: Option<Price>,
    #[serde(rename = "despues")]
    pub after: Option<Price>,
    pub delta: Option<Price>,
    #[serde(rename = "confianza")]
    pub confidence: u8,
    /// Phase that mapped the listing; `None` for DELETE records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<MatchAlgorithm>,
}

/// Change counts for the diff view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub inserts: usize,
    pub updates: usize,
    pub deletes: usize,
    pub noops: usize,
    /// Listings without a mapped capacity (routed to review)
    pub unmapped: usize,
    /// inserts + updates + deletes
    pub total: usize,
}

impl DiffSummary {
    pub fn from_changes(changes: &[ChangeRecord], unmapped: usize) -> Self {
        let mut summary = DiffSummary {
            unmapped,
            ..Default::default()
        };
        for change in changes {
            match change.kind {
                ChangeKind::Insert => summary.inserts += 1,
                ChangeKind::Update => summary.updates += 1,
                ChangeKind::Delete => summary.deletes += 1,
                ChangeKind::Noop => summary.noops += 1,
            }
        }
        summary.total = summary.inserts + summary.updates + summary.deletes;
        summary
    }
}

/// Diff payload consumed by the review UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffReport {
    pub summary: DiffSummary,
    pub changes: Vec<ChangeRecord>,
    /// Listings mapped to a capacity whose change is owned by another listing
    #[serde(default)]
    pub duplicates: Vec<i64>,
}
