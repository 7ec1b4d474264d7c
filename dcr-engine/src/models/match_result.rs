//! Match results produced by the matching engine

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which matching phase produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchAlgorithm {
    Cached,
    Exact,
    Fuzzy,
    Heuristic,
    Failed,
}

impl MatchAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchAlgorithm::Cached => "cached",
            MatchAlgorithm::Exact => "exact",
            MatchAlgorithm::Fuzzy => "fuzzy",
            MatchAlgorithm::Heuristic => "heuristic",
            MatchAlgorithm::Failed => "failed",
        }
    }
}

impl fmt::Display for MatchAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cached" => Ok(MatchAlgorithm::Cached),
            "exact" => Ok(MatchAlgorithm::Exact),
            "fuzzy" => Ok(MatchAlgorithm::Fuzzy),
            "heuristic" => Ok(MatchAlgorithm::Heuristic),
            "failed" => Ok(MatchAlgorithm::Failed),
            other => Err(format!("unknown match algorithm: {}", other)),
        }
    }
}

/// Outcome of matching one listing. Never mutated; a newer revision supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub staging_item_id: i64,
    pub capacity_id: Option<i64>,
    pub model_id: Option<i64>,
    /// 0-100
    pub confidence: u8,
    pub algorithm: MatchAlgorithm,
    pub needs_review: bool,
    /// Phase trace, failure reason, inferred storage, origin of superseding revisions
    pub metadata: serde_json::Value,
}

impl MatchResult {
    pub fn failed(staging_item_id: i64, metadata: serde_json::Value) -> Self {
        Self {
            staging_item_id,
            capacity_id: None,
            model_id: None,
            confidence: 0,
            algorithm: MatchAlgorithm::Failed,
            needs_review: true,
            metadata,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.capacity_id.is_some()
    }

    /// Human-readable failure reason recorded by the engine, if any
    pub fn reason(&self) -> Option<&str> {
        self.metadata.get("reason").and_then(|r| r.as_str())
    }
}
