//! Task orchestrator
//!
//! Runs staging batches off the request path. Status, progress and logs live
//! in the database so polling keeps working across restarts; only the
//! cancellation tokens and join handles of this process are held in memory.

use chrono::{DateTime, Utc};
use dcr_common::{Error, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::pipeline::StagingPipeline;
use crate::db;
use crate::models::{BatchLogLine, BatchProgress, BatchStatus, FeedListing, StagingBatch, TaskState};

/// Task status as polled by the admin UI
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub batch_id: Uuid,
    pub estado: TaskState,
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub progress: BatchProgress,
    pub incomplete: bool,
    pub applied_count: i64,
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_batch_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<StagingBatch> for TaskStatus {
    fn from(batch: StagingBatch) -> Self {
        Self {
            batch_id: batch.batch_id,
            estado: batch.status.wire_state(),
            status: batch.status,
            error_message: batch.error_message,
            progress: batch.progress,
            incomplete: batch.incomplete,
            applied_count: batch.applied_count,
            channel: batch.channel,
            source_batch_id: batch.source_batch_id,
            created_at: batch.created_at,
            started_at: batch.started_at,
            ended_at: batch.ended_at,
        }
    }
}

/// One page of batch log lines
#[derive(Debug, Clone, Serialize)]
pub struct LogPage {
    pub lines: Vec<BatchLogLine>,
    /// Pass as `since` to fetch the following lines
    pub next: i64,
}

struct RunningTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct TaskOrchestrator {
    db: SqlitePool,
    pipeline: Arc<StagingPipeline>,
    tasks: Mutex<HashMap<Uuid, RunningTask>>,
}

impl TaskOrchestrator {
    pub fn new(db: SqlitePool, pipeline: Arc<StagingPipeline>) -> Self {
        Self {
            db,
            pipeline,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Validate and stage a feed, then start matching it in the background
    ///
    /// Returns as soon as the batch is persisted.
    pub async fn launch(
        &self,
        listings: Vec<FeedListing>,
        channel: Option<String>,
    ) -> Result<TaskStatus> {
        let batch = self.pipeline.stage_batch(listings, channel).await?;
        let status = TaskStatus::from(batch.clone());
        self.spawn(batch.batch_id).await;
        Ok(status)
    }

    /// Replay the stored listings of a batch against the current catalog
    pub async fn remap(&self, source_batch_id: Uuid) -> Result<TaskStatus> {
        let batch = self.pipeline.stage_replay(source_batch_id).await?;
        tracing::info!(
            batch_id = %batch.batch_id,
            source_batch_id = %source_batch_id,
            "Remap launched"
        );
        let status = TaskStatus::from(batch.clone());
        self.spawn(batch.batch_id).await;
        Ok(status)
    }

    async fn spawn(&self, batch_id: Uuid) {
        let cancel_token = CancellationToken::new();
        let pipeline = Arc::clone(&self.pipeline);
        let token = cancel_token.clone();

        let mut tasks = self.tasks.lock().await;
        tasks.retain(|_, task| !task.handle.is_finished());

        let handle = tokio::spawn(async move {
            tracing::info!(batch_id = %batch_id, "Background batch task started");
            match pipeline.run_batch(batch_id, token).await {
                Ok(batch) => tracing::info!(
                    batch_id = %batch_id,
                    status = %batch.status,
                    "Background batch task completed"
                ),
                Err(e) => tracing::error!(
                    batch_id = %batch_id,
                    error = %e,
                    "Background batch task failed"
                ),
            }
        });

        tasks.insert(
            batch_id,
            RunningTask {
                cancel_token,
                handle,
            },
        );
    }

    pub async fn status(&self, batch_id: Uuid) -> Result<TaskStatus> {
        db::batches::load_batch(&self.db, batch_id)
            .await?
            .map(TaskStatus::from)
            .ok_or_else(|| Error::NotFound(format!("batch {}", batch_id)))
    }

    /// Log lines after `since` (0 for all)
    pub async fn logs(&self, batch_id: Uuid, since: i64) -> Result<LogPage> {
        // Existence check so unknown ids are 404 rather than an empty page
        self.status(batch_id).await?;

        let lines = db::batches::load_logs(&self.db, batch_id, since.max(0)).await?;
        let next = lines.last().map(|line| line.seq).unwrap_or(since.max(0));
        Ok(LogPage { lines, next })
    }

    /// Request cancellation of a batch
    ///
    /// A running batch stops scheduling new matches, lets in-flight ones
    /// finish and persists its partial change set. A batch with no task in
    /// this process is marked cancelled directly.
    pub async fn cancel(&self, batch_id: Uuid) -> Result<TaskStatus> {
        let mut batch = db::batches::load_batch(&self.db, batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("batch {}", batch_id)))?;
        if batch.status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "batch {} already finished ({})",
                batch_id, batch.status
            )));
        }

        let signalled = {
            let tasks = self.tasks.lock().await;
            match tasks.get(&batch_id) {
                Some(task) if !task.handle.is_finished() => {
                    task.cancel_token.cancel();
                    true
                }
                _ => false,
            }
        };

        if signalled {
            tracing::info!(batch_id = %batch_id, "Cancellation requested");
            self.pipeline
                .log(batch_id, "warn", "Cancellation requested")
                .await;
        } else {
            tracing::warn!(batch_id = %batch_id, "No task for batch, marking cancelled");
            batch.status = BatchStatus::Cancelled;
            batch.incomplete = batch.progress.processed < batch.progress.total;
            batch.error_message = Some("cancelled by user".to_string());
            batch.ended_at = Some(Utc::now());
            db::batches::save_batch(&self.db, &batch, self.pipeline.config().db_max_lock_wait_ms)
                .await?;
        }

        self.status(batch_id).await
    }

    /// Wait for the background task of a batch, if this process runs one
    pub async fn wait_for(&self, batch_id: Uuid) -> Result<TaskStatus> {
        let task = self.tasks.lock().await.remove(&batch_id);
        if let Some(task) = task {
            if let Err(e) = task.handle.await {
                tracing::error!(batch_id = %batch_id, error = %e, "Batch task panicked");
            }
        }
        self.status(batch_id).await
    }

    /// Mark batches a previous process left queued or running as failed and
    /// persist the change set of whatever they matched
    pub async fn recover_interrupted(&self) -> Result<Vec<Uuid>> {
        let recovered = db::batches::cleanup_stale_batches(&self.db).await?;
        for &batch_id in &recovered {
            self.pipeline
                .log(batch_id, "error", db::batches::INTERRUPTED_MESSAGE)
                .await;
            if let Err(e) = self.pipeline.derive_partial_changes(batch_id).await {
                tracing::warn!(
                    batch_id = %batch_id,
                    error = %e,
                    "Could not derive partial change set for interrupted batch"
                );
            }
        }

        if !recovered.is_empty() {
            tracing::warn!(count = recovered.len(), "Recovered interrupted batches");
        }
        Ok(recovered)
    }

    /// Cancel every running batch and wait for the tasks to wind down
    pub async fn shutdown(&self) {
        let tasks: Vec<(Uuid, RunningTask)> = self.tasks.lock().await.drain().collect();
        for (_, task) in &tasks {
            task.cancel_token.cancel();
        }
        for (batch_id, task) in tasks {
            if let Err(e) = task.handle.await {
                tracing::error!(batch_id = %batch_id, error = %e, "Batch task panicked");
            }
        }
    }

    /// Batches with a live task in this process
    pub async fn active_count(&self) -> usize {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|task| !task.handle.is_finished())
            .count()
    }
}
