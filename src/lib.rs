pub mod date_util;
pub mod error;
pub mod remote;
pub mod storage;
pub mod sync;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::OnceCell;

pub use error::{Error, Result};
pub use remote::{OutboxRemote, RemoteWriter};
pub use storage::adapter::StoreAdapter;
pub use storage::repository::{LocalRecord, NewChange, SyncRunRow};
pub use storage::Database;
pub use sync::config::{RetryScope, SyncConfig, CONFIG_KEYS};
pub use sync::connectivity::{ConnectivityProvider, ManualConnectivity};
pub use sync::coordinator::{SyncCoordinator, TriggerHandle};
pub use sync::item::{PendingRecord, Priority, SourceAdapter, SourceType, SyncItem};
pub use sync::progress::{ProgressReporter, ProgressSnapshot};
pub use sync::queue::QueueBuilder;
pub use sync::{ChannelProgress, LogProgress, NoopProgress, RunStatus, SyncProgress, SyncReport};

use storage::repository;

/// Local store overview for the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub pending: Vec<(SourceType, i64)>,
    pub pending_total: i64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub recent_runs: Vec<SyncRunRow>,
}

/// Main entry point: a local store plus the remote its changes are pushed to.
///
/// Owns one [`SyncCoordinator`], so every run started through the same
/// `ShiftSync` shares a single-flight slot.
pub struct ShiftSync {
    db: Database,
    remote: Arc<dyn RemoteWriter>,
    observer: Arc<dyn SyncProgress>,
    coordinator: OnceCell<SyncCoordinator>,
}

impl ShiftSync {
    pub fn new(db: Database, remote: Arc<dyn RemoteWriter>) -> Self {
        Self {
            db,
            remote,
            observer: Arc::new(NoopProgress),
            coordinator: OnceCell::new(),
        }
    }

    /// Observer for runs started through this facade.
    pub fn with_observer(mut self, observer: Arc<dyn SyncProgress>) -> Self {
        self.observer = observer;
        self
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    // ── Local changes ──────────────────────────────────────────────

    pub async fn record_change(&self, change: NewChange) -> Result<()> {
        self.db
            .writer()
            .call(move |conn| repository::record_change(conn, &change))
            .await?;
        Ok(())
    }

    pub async fn pending_counts(&self) -> Result<Vec<(SourceType, i64)>> {
        let counts = self
            .db
            .reader()
            .call(|conn| {
                let mut counts = Vec::with_capacity(SourceType::ALL.len());
                for domain in SourceType::ALL {
                    counts.push((domain, repository::count_unsynced(conn, domain)?));
                }
                Ok::<_, rusqlite::Error>(counts)
            })
            .await?;
        Ok(counts)
    }

    /// A queue builder with one store-backed adapter per domain.
    pub fn queue_builder(&self) -> Result<QueueBuilder> {
        let mut queue = QueueBuilder::new();
        for adapter in StoreAdapter::for_all(&self.db, Arc::clone(&self.remote)) {
            queue.register(adapter)?;
        }
        Ok(queue)
    }

    /// The ordered queue a sync run would push right now.
    pub async fn pending_queue(&self) -> Result<Vec<SyncItem>> {
        Ok(self.queue_builder()?.build().await)
    }

    // ── Sync ───────────────────────────────────────────────────────

    /// Engine configuration from `app_config`, over the defaults.
    pub async fn load_config(&self) -> Result<SyncConfig> {
        let pairs = self.config_list().await?;
        SyncConfig::from_pairs(&pairs)
    }

    pub async fn last_success_at(&self) -> Result<Option<DateTime<Utc>>> {
        let at = self
            .db
            .reader()
            .call(|conn| repository::last_success_at(conn))
            .await?;
        Ok(at)
    }

    /// The coordinator over this store. Built on first use from the stored
    /// configuration and seeded with the last recorded success; later config
    /// changes apply to the next `ShiftSync`.
    pub async fn coordinator(&self) -> Result<&SyncCoordinator> {
        self.coordinator
            .get_or_try_init(|| async {
                let config = self.load_config().await?;
                let last_success = self.last_success_at().await?;
                let reporter = ProgressReporter::new(Arc::clone(&self.observer))
                    .with_last_success(last_success);
                SyncCoordinator::with_reporter(config, self.queue_builder()?, reporter)
            })
            .await
    }

    /// Run one sync to completion and record it. Fails with
    /// [`Error::AlreadyRunning`] while another run holds the slot.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let report = self
            .coordinator()
            .await?
            .run_now()
            .await
            .ok_or(Error::AlreadyRunning)?;
        self.record_run(&report).await?;
        Ok(report)
    }

    /// Store a finished run in the history. Runs that found nothing pending
    /// are not recorded.
    pub async fn record_run(&self, report: &SyncReport) -> Result<Option<i64>> {
        if report.batches_total == 0 {
            return Ok(None);
        }
        let report = report.clone();
        let id = self
            .db
            .writer()
            .call(move |conn| repository::insert_sync_run(conn, &report))
            .await?;
        Ok(Some(id))
    }

    pub async fn status(&self, recent: u32) -> Result<StoreStatus> {
        let pending = self.pending_counts().await?;
        let recent_runs = self
            .db
            .reader()
            .call(move |conn| repository::list_sync_runs(conn, recent))
            .await?;
        Ok(StoreStatus {
            pending_total: pending.iter().map(|(_, n)| n).sum(),
            pending,
            last_success_at: self.last_success_at().await?,
            recent_runs,
        })
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Set a known engine key. The value is rejected if the resulting
    /// configuration would not validate.
    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        if !CONFIG_KEYS.contains(&key) {
            return Err(Error::Config(format!(
                "unknown key {key:?}; expected one of: {}",
                CONFIG_KEYS.join(", ")
            )));
        }

        let mut pairs = self.config_list().await?;
        pairs.retain(|(k, _)| k != key);
        pairs.push((key.to_string(), value.to_string()));
        SyncConfig::from_pairs(&pairs)?;

        self.db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.trim().to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Remove a key so its default applies again. Returns whether it was set.
    pub async fn config_unset(&self, key: &str) -> Result<bool> {
        self.db
            .writer()
            .call({
                let key = key.to_string();
                move |conn| repository::unset_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }
}
