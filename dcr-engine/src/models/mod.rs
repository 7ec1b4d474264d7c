//! Data models for the reconciliation engine

pub mod batch;
pub mod catalog;
pub mod change;
pub mod knowledge;
pub mod listing;
pub mod match_result;
pub mod price;
pub mod review;

pub use batch::{BatchLogLine, BatchProgress, BatchStatus, StagingBatch, TaskState};
pub use catalog::{CatalogCapacity, CatalogModel, NewCatalogCapacity, NewCatalogModel};
pub use change::{ChangeKind, ChangeRecord, DiffReport, DiffSummary};
pub use knowledge::{KnowledgeEntry, KnowledgeEvent, KnowledgeMetrics};
pub use listing::{validate_feed, ExternalListing, FeedListing};
pub use match_result::{MatchAlgorithm, MatchResult};
pub use price::Price;
pub use review::{DecisionKind, ReviewDecision, ReviewState};
