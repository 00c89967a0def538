use std::sync::Arc;

use async_trait::async_trait;

use super::repository;
use super::Database;
use crate::error::{Error, Result};
use crate::remote::RemoteWriter;
use crate::sync::item::{PendingRecord, SourceAdapter, SourceType};

/// Source adapter over one domain of the local `pending_changes` table.
///
/// A push reads the domain's unsynced rows, hands them to the remote and then
/// marks exactly the revisions it sent. Rows edited mid-push stay pending.
pub struct StoreAdapter {
    db: Database,
    domain: SourceType,
    remote: Arc<dyn RemoteWriter>,
}

impl StoreAdapter {
    pub fn new(db: Database, domain: SourceType, remote: Arc<dyn RemoteWriter>) -> Self {
        Self { db, domain, remote }
    }

    /// One adapter per domain, all sharing the same store and remote.
    pub fn for_all(db: &Database, remote: Arc<dyn RemoteWriter>) -> Vec<Arc<dyn SourceAdapter>> {
        SourceType::ALL
            .iter()
            .map(|&domain| {
                Arc::new(Self::new(db.clone(), domain, remote.clone())) as Arc<dyn SourceAdapter>
            })
            .collect()
    }

    async fn unsynced(&self) -> Result<Vec<repository::LocalRecord>> {
        let domain = self.domain;
        let records = self
            .db
            .reader()
            .call(move |conn| repository::list_unsynced(conn, domain))
            .await?;
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for StoreAdapter {
    fn source_type(&self) -> SourceType {
        self.domain
    }

    async fn has_pending(&self) -> Result<bool> {
        let domain = self.domain;
        let count = self
            .db
            .reader()
            .call(move |conn| repository::count_unsynced(conn, domain))
            .await?;
        Ok(count > 0)
    }

    async fn list_pending(&self) -> Result<Vec<PendingRecord>> {
        let records = self.unsynced().await?;
        Ok(records
            .into_iter()
            .map(|r| {
                let mut pending = PendingRecord::new(r.record_id.as_str())
                    .payload_ref(format!("{}:{}", r.domain, r.record_id));
                pending.captured_at = r.captured_at;
                pending.priority = r.priority;
                pending
            })
            .collect())
    }

    async fn push_pending(&self) -> Result<()> {
        let records = self.unsynced().await?;
        if records.is_empty() {
            return Ok(());
        }

        self.remote
            .write(self.domain, &records)
            .await
            .map_err(|e| Error::Push {
                source_type: self.domain,
                message: e.to_string(),
            })?;

        let domain = self.domain;
        let sent: Vec<(String, i64)> = records
            .into_iter()
            .map(|r| (r.record_id, r.revision))
            .collect();
        let sent_count = sent.len();
        let marked = self
            .db
            .writer()
            .call(move |conn| repository::mark_synced(conn, domain, &sent))
            .await?;

        if marked < sent_count {
            log::debug!(
                "{domain}: {} record(s) changed during push and stay pending",
                sent_count - marked
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::{LocalRecord, NewChange};
    use crate::sync::item::Priority;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryRemote {
        written: Mutex<Vec<LocalRecord>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl RemoteWriter for MemoryRemote {
        async fn write(&self, _domain: SourceType, records: &[LocalRecord]) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Remote("connection reset".into()));
            }
            self.written.lock().unwrap().extend_from_slice(records);
            Ok(())
        }
    }

    async fn seed(db: &Database, changes: Vec<NewChange>) {
        db.writer()
            .call(move |conn| {
                for change in &changes {
                    repository::record_change(conn, change)?;
                }
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_lists_only_own_domain() {
        let db = Database::open_memory().await.unwrap();
        let mut demoted = NewChange::new(SourceType::Shift, "s1");
        demoted.priority = Some(Priority::Low);
        seed(&db, vec![demoted, NewChange::new(SourceType::Vehicle, "v1")]).await;

        let adapter = StoreAdapter::new(db, SourceType::Shift, Arc::new(MemoryRemote::default()));
        assert!(adapter.has_pending().await.unwrap());

        let pending = adapter.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "s1");
        assert_eq!(pending[0].payload_ref, "shift:s1");
        assert_eq!(pending[0].priority, Some(Priority::Low));
    }

    #[tokio::test]
    async fn test_push_marks_records_synced() {
        let db = Database::open_memory().await.unwrap();
        seed(
            &db,
            vec![
                NewChange::new(SourceType::Calculation, "c1"),
                NewChange::new(SourceType::Calculation, "c2"),
            ],
        )
        .await;

        let remote = Arc::new(MemoryRemote::default());
        let adapter = StoreAdapter::new(db, SourceType::Calculation, remote.clone());
        adapter.push_pending().await.unwrap();

        assert_eq!(remote.written.lock().unwrap().len(), 2);
        assert!(!adapter.has_pending().await.unwrap());

        // Nothing left to send: a second push is a no-op.
        adapter.push_pending().await.unwrap();
        assert_eq!(remote.written.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_push_leaves_records_pending() {
        let db = Database::open_memory().await.unwrap();
        seed(&db, vec![NewChange::new(SourceType::Vehicle, "v1")]).await;

        let remote = Arc::new(MemoryRemote::default());
        remote.fail.store(true, Ordering::SeqCst);
        let adapter = StoreAdapter::new(db, SourceType::Vehicle, remote.clone());

        let err = adapter.push_pending().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Push {
                source_type: SourceType::Vehicle,
                ..
            }
        ));
        assert!(adapter.has_pending().await.unwrap());

        remote.fail.store(false, Ordering::SeqCst);
        adapter.push_pending().await.unwrap();
        assert!(!adapter.has_pending().await.unwrap());
    }

    #[tokio::test]
    async fn test_for_all_covers_every_domain() {
        let db = Database::open_memory().await.unwrap();
        let adapters = StoreAdapter::for_all(&db, Arc::new(MemoryRemote::default()));
        let types: Vec<SourceType> = adapters.iter().map(|a| a.source_type()).collect();
        assert_eq!(types, SourceType::ALL.to_vec());
    }
}
