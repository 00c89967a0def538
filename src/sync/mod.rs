pub mod batch;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod item;
pub mod progress;
pub mod queue;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use progress::ProgressSnapshot;

/// Lifecycle of a sync run as seen from outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RunStatus {
    #[default]
    Idle,
    Building,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Building or Running: a run holds the single-flight slot.
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Building | RunStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Building => "building",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report returned after a sync run reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub status: RunStatus,
    pub items_total: usize,
    pub items_synced: usize,
    pub batches_completed: usize,
    pub batches_total: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl SyncReport {
    /// Report for a run that found nothing pending.
    pub fn empty(started_at: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Succeeded,
            items_total: 0,
            items_synced: 0,
            batches_completed: 0,
            batches_total: 0,
            started_at,
            finished_at: Utc::now(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// Receives engine progress. Purely a sink: implementations must not call
/// back into the coordinator.
pub trait SyncProgress: Send + Sync {
    fn on_status(&self, _snapshot: &ProgressSnapshot) {}
    fn on_run_start(&self, _total_items: usize, _total_batches: usize) {}
    fn on_progress(&self, _snapshot: &ProgressSnapshot) {}
    fn on_run_complete(&self, _report: &SyncReport) {}
}

/// No-op progress reporter for callers that don't need progress.
pub struct NoopProgress;
impl SyncProgress for NoopProgress {}

/// Writes progress to the `log` facade.
pub struct LogProgress;

impl SyncProgress for LogProgress {
    fn on_run_start(&self, total_items: usize, total_batches: usize) {
        log::info!("Sync started: {total_items} items in {total_batches} batches");
    }

    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        log::info!(
            "Sync progress: {}% ({}/{} batches)",
            snapshot.percent,
            snapshot.completed_batches,
            snapshot.total_batches
        );
    }

    fn on_run_complete(&self, report: &SyncReport) {
        match &report.error {
            None => log::info!(
                "Sync {}: {} items in {} batches",
                report.status,
                report.items_synced,
                report.batches_completed
            ),
            Some(err) => log::error!("Sync {}: {err}", report.status),
        }
    }
}

/// Forwards every finished report over a channel and delegates the rest to
/// an inner observer. Lets a caller persist reports from background runs.
pub struct ChannelProgress {
    inner: std::sync::Arc<dyn SyncProgress>,
    tx: tokio::sync::mpsc::UnboundedSender<SyncReport>,
}

impl ChannelProgress {
    pub fn new(
        inner: std::sync::Arc<dyn SyncProgress>,
    ) -> (Self, tokio::sync::mpsc::UnboundedReceiver<SyncReport>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { inner, tx }, rx)
    }
}

impl SyncProgress for ChannelProgress {
    fn on_status(&self, snapshot: &ProgressSnapshot) {
        self.inner.on_status(snapshot);
    }

    fn on_run_start(&self, total_items: usize, total_batches: usize) {
        self.inner.on_run_start(total_items, total_batches);
    }

    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.inner.on_progress(snapshot);
    }

    fn on_run_complete(&self, report: &SyncReport) {
        self.inner.on_run_complete(report);
        if self.tx.send(report.clone()).is_err() {
            log::debug!("Run report dropped: receiver closed");
        }
    }
}
