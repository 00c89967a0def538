use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Data domain a pending record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Shift,
    Vehicle,
    Calculation,
}

impl SourceType {
    pub const ALL: [SourceType; 3] = [SourceType::Shift, SourceType::Vehicle, SourceType::Calculation];

    /// Fixed priority class of the domain.
    pub fn default_priority(self) -> Priority {
        match self {
            SourceType::Shift => Priority::High,
            SourceType::Vehicle => Priority::Medium,
            SourceType::Calculation => Priority::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Shift => "shift",
            SourceType::Vehicle => "vehicle",
            SourceType::Calculation => "calculation",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shift" | "shifts" => Ok(SourceType::Shift),
            "vehicle" | "vehicles" => Ok(SourceType::Vehicle),
            "calculation" | "calculations" => Ok(SourceType::Calculation),
            other => Err(Error::Other(format!(
                "unknown source type: {other} (expected shift, vehicle or calculation)"
            ))),
        }
    }
}

/// Priority class. Variants are declared most-important first so the derived
/// `Ord` sorts High before Medium before Low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(Error::Other(format!("unknown priority: {other}"))),
        }
    }
}

/// A pending record as reported by a source adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub id: String,
    /// Natural timestamp of the local mutation, if the record has one.
    pub captured_at: Option<DateTime<Utc>>,
    /// Opaque handle the adapter uses to find the record again.
    pub payload_ref: String,
    pub priority: Option<Priority>,
}

impl PendingRecord {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            payload_ref: id.clone(),
            id,
            captured_at: None,
            priority: None,
        }
    }

    pub fn captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = Some(at);
        self
    }

    pub fn payload_ref(mut self, payload_ref: impl Into<String>) -> Self {
        self.payload_ref = payload_ref.into();
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// The engine's uniform, priority-tagged wrapper around one pending record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncItem {
    pub id: String,
    pub source_type: SourceType,
    pub priority: Priority,
    pub captured_at: DateTime<Utc>,
    pub payload_ref: String,
}

impl SyncItem {
    pub fn from_record(
        record: PendingRecord,
        source_type: SourceType,
        default_priority: Priority,
        built_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: record.id,
            source_type,
            priority: record.priority.unwrap_or(default_priority),
            captured_at: record.captured_at.unwrap_or(built_at),
            payload_ref: record.payload_ref,
        }
    }
}

/// One data domain's view of its locally-pending records.
///
/// `push_pending` sends every record the adapter currently considers pending
/// in one call. It must be safe to call repeatedly: a failed attempt is
/// retried as a whole, so an adapter that already succeeded in that attempt
/// is invoked again.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_type(&self) -> SourceType;

    fn priority(&self) -> Priority {
        self.source_type().default_priority()
    }

    async fn has_pending(&self) -> Result<bool>;

    async fn list_pending(&self) -> Result<Vec<PendingRecord>>;

    async fn push_pending(&self) -> Result<()>;
}
