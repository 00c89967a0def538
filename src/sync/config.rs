use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};

/// What a retry re-issues after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryScope {
    /// Re-issue every per-type push in the batch. Adapters must be idempotent.
    #[default]
    WholeBatch,
    /// Re-issue only the pushes that failed in the previous attempt.
    FailedOnly,
}

impl fmt::Display for RetryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryScope::WholeBatch => f.write_str("whole_batch"),
            RetryScope::FailedOnly => f.write_str("failed_only"),
        }
    }
}

impl FromStr for RetryScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "whole_batch" | "whole" => Ok(RetryScope::WholeBatch),
            "failed_only" | "failed" => Ok(RetryScope::FailedOnly),
            other => Err(Error::InvalidConfiguration(format!(
                "retry_scope must be whole_batch or failed_only, got {other}"
            ))),
        }
    }
}

/// Static engine configuration, fixed when the coordinator is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub base_delay: Duration,
    pub reconnect_debounce: Duration,
    pub periodic_interval: Duration,
    /// Upper bound on one attempt's fan-out; `None` waits indefinitely.
    pub attempt_timeout: Option<Duration>,
    pub retry_scope: RetryScope,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            reconnect_debounce: Duration::from_millis(2000),
            periodic_interval: Duration::from_millis(300_000),
            attempt_timeout: None,
            retry_scope: RetryScope::WholeBatch,
        }
    }
}

/// Keys understood by [`SyncConfig::from_pairs`].
pub const CONFIG_KEYS: &[&str] = &[
    "batch_size",
    "max_retries",
    "base_delay_ms",
    "reconnect_debounce_ms",
    "periodic_interval_ms",
    "attempt_timeout_ms",
    "retry_scope",
];

impl SyncConfig {
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn reconnect_debounce(mut self, delay: Duration) -> Self {
        self.reconnect_debounce = delay;
        self
    }

    pub fn periodic_interval(mut self, interval: Duration) -> Self {
        self.periodic_interval = interval;
        self
    }

    pub fn attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn retry_scope(mut self, scope: RetryScope) -> Self {
        self.retry_scope = scope;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfiguration(
                "batch_size must be at least 1".into(),
            ));
        }
        if self.max_retries == 0 {
            return Err(Error::InvalidConfiguration(
                "max_retries must be at least 1".into(),
            ));
        }
        if self.periodic_interval.is_zero() {
            return Err(Error::InvalidConfiguration(
                "periodic_interval_ms must be positive".into(),
            ));
        }
        if self.attempt_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::InvalidConfiguration(
                "attempt_timeout_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Apply `(key, value)` overrides on top of the defaults.
    /// Keys outside [`CONFIG_KEYS`] are ignored.
    pub fn from_pairs<K, V>(pairs: &[(K, V)]) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                "batch_size" => config.batch_size = parse_number(key, value)?,
                "max_retries" => config.max_retries = parse_number(key, value)?,
                "base_delay_ms" => config.base_delay = parse_millis(key, value)?,
                "reconnect_debounce_ms" => config.reconnect_debounce = parse_millis(key, value)?,
                "periodic_interval_ms" => config.periodic_interval = parse_millis(key, value)?,
                "attempt_timeout_ms" => {
                    config.attempt_timeout = match value {
                        "" | "none" | "off" => None,
                        _ => Some(parse_millis(key, value)?),
                    }
                }
                "retry_scope" => config.retry_scope = value.parse()?,
                _ => {}
            }
        }
        config.validate()?;
        Ok(config)
    }
}

/// Parse into the field's own integer type so out-of-range values are
/// rejected instead of wrapping.
fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        Error::InvalidConfiguration(format!(
            "{key} must be a non-negative integer in range, got {value:?}"
        ))
    })
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    parse_number::<u64>(key, value).map(Duration::from_millis)
}
