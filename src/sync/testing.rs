//! In-memory adapters shared by the sync module tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

use super::item::{PendingRecord, SourceAdapter, SourceType};
use crate::error::{Error, Result};

pub fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, hour, minute, 0).unwrap()
}

/// Paused-clock durations land on the timer's millisecond grid, so allow a
/// little slack above the expected value.
pub fn assert_millis(actual: Duration, expected: u64) {
    let expected = Duration::from_millis(expected);
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(50),
        "expected ~{expected:?}, got {actual:?}"
    );
}

pub struct MockAdapter {
    source_type: SourceType,
    records: Mutex<Vec<PendingRecord>>,
    fail_first: AtomicU32,
    always_fail: AtomicBool,
    read_fails: bool,
    clear_on_push: bool,
    push_delay: Option<Duration>,
    pub pushes: AtomicU32,
    push_times: Mutex<Vec<Instant>>,
}

impl MockAdapter {
    pub fn new(source_type: SourceType, records: Vec<PendingRecord>) -> Self {
        Self {
            source_type,
            records: Mutex::new(records),
            fail_first: AtomicU32::new(0),
            always_fail: AtomicBool::new(false),
            read_fails: false,
            clear_on_push: false,
            push_delay: None,
            pushes: AtomicU32::new(0),
            push_times: Mutex::new(Vec::new()),
        }
    }

    /// `count` records with ids `{prefix}{n}` captured one minute apart.
    pub fn with_count(source_type: SourceType, prefix: &str, count: u32) -> Self {
        let records = (0..count)
            .map(|n| PendingRecord::new(format!("{prefix}{n}")).captured_at(ts(9, n)))
            .collect();
        Self::new(source_type, records)
    }

    pub fn failing(self) -> Self {
        self.always_fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_first(self, attempts: u32) -> Self {
        self.fail_first.store(attempts, Ordering::SeqCst);
        self
    }

    pub fn unreadable(mut self) -> Self {
        self.read_fails = true;
        self
    }

    pub fn clearing(mut self) -> Self {
        self.clear_on_push = true;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.push_delay = Some(delay);
        self
    }

    pub fn push_count(&self) -> u32 {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Time between consecutive push calls, in call order.
    pub fn push_gaps(&self) -> Vec<Duration> {
        let times = self.push_times.lock().unwrap();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    pub fn add_record(&self, record: PendingRecord) {
        self.records.lock().unwrap().push(record);
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

#[async_trait]
impl SourceAdapter for MockAdapter {
    fn source_type(&self) -> SourceType {
        self.source_type
    }

    async fn has_pending(&self) -> Result<bool> {
        if self.read_fails {
            return Err(Error::Other("store unavailable".into()));
        }
        Ok(!self.records.lock().unwrap().is_empty())
    }

    async fn list_pending(&self) -> Result<Vec<PendingRecord>> {
        if self.read_fails {
            return Err(Error::Other("store unavailable".into()));
        }
        Ok(self.records.lock().unwrap().clone())
    }

    async fn push_pending(&self) -> Result<()> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        self.push_times.lock().unwrap().push(Instant::now());
        if let Some(delay) = self.push_delay {
            tokio::time::sleep(delay).await;
        }
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(Error::Push {
                source_type: self.source_type,
                message: "backend rejected request".into(),
            });
        }
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::Push {
                source_type: self.source_type,
                message: "connection reset".into(),
            });
        }
        if self.clear_on_push {
            self.records.lock().unwrap().clear();
        }
        Ok(())
    }
}
