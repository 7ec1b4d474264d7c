//! Reconciliation services
//!
//! Matching engine, Knowledge Base learning, staging & diff pipeline,
//! review workflow, metrics and the task orchestrator.

pub mod diff;
pub mod knowledge_base;
pub mod matching;
pub mod metrics;
pub mod pipeline;
pub mod review;
pub mod task_orchestrator;

pub use diff::{compute_changes, ChangeSet, DiffOptions};
pub use knowledge_base::KnowledgeCache;
pub use matching::{CatalogSnapshot, MatchingEngine};
pub use metrics::BatchMetrics;
pub use pipeline::{ApplyConflict, ApplyFilter, ApplyReport, StagingPipeline};
pub use review::{CreateModelOutcome, DecisionOutcome, NewModelRequest, ReviewItem, ReviewService};
pub use task_orchestrator::{LogPage, TaskOrchestrator, TaskStatus};
