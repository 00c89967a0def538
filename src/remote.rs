use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::storage::repository::LocalRecord;
use crate::sync::item::SourceType;

/// Destination for pushed records. Writes must tolerate the same record
/// arriving more than once.
#[async_trait]
pub trait RemoteWriter: Send + Sync {
    async fn write(&self, domain: SourceType, records: &[LocalRecord]) -> Result<()>;
}

/// Appends records as JSON lines to `<dir>/<domain>.jsonl`. Stands in for a
/// server when working offline or testing.
#[derive(Debug, Clone)]
pub struct OutboxRemote {
    dir: PathBuf,
}

impl OutboxRemote {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.shiftsync/outbox`
    pub fn default_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| Error::Config("cannot determine home directory".into()))?
            .join(".shiftsync")
            .join("outbox"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, domain: SourceType) -> PathBuf {
        self.dir.join(format!("{}.jsonl", domain.as_str()))
    }
}

#[async_trait]
impl RemoteWriter for OutboxRemote {
    async fn write(&self, domain: SourceType, records: &[LocalRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for record in records {
            buf.push_str(&serde_json::to_string(record)?);
            buf.push('\n');
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(domain))
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;

        log::debug!("Wrote {} {domain} record(s) to outbox", records.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, revision: i64) -> LocalRecord {
        LocalRecord {
            domain: SourceType::Vehicle,
            record_id: id.to_string(),
            captured_at: None,
            payload: serde_json::json!({"plate": "KA-123"}),
            priority: None,
            revision,
        }
    }

    #[tokio::test]
    async fn test_outbox_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let remote = OutboxRemote::new(dir.path().join("out"));

        remote
            .write(SourceType::Vehicle, &[record("car-1", 1), record("car-2", 1)])
            .await
            .unwrap();
        remote
            .write(SourceType::Vehicle, &[record("car-1", 2)])
            .await
            .unwrap();

        let text = std::fs::read_to_string(remote.path_for(SourceType::Vehicle)).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["record_id"], "car-1");
        assert_eq!(lines[2]["revision"], 2);
        assert_eq!(lines[2]["domain"], "vehicle");
        assert_eq!(lines[1]["payload"]["plate"], "KA-123");
    }

    #[tokio::test]
    async fn test_outbox_skips_empty_writes() {
        let dir = tempfile::tempdir().unwrap();
        let remote = OutboxRemote::new(dir.path());

        remote.write(SourceType::Shift, &[]).await.unwrap();
        assert!(!remote.path_for(SourceType::Shift).exists());
    }
}
