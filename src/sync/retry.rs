use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::sync::batch::Batch;
use crate::sync::config::{RetryScope, SyncConfig};
use crate::sync::item::{SourceAdapter, SourceType};

/// Retry settings for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts in total, including the first.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Option<Duration>,
    pub scope: RetryScope,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            attempt_timeout: None,
            scope: RetryScope::WholeBatch,
        }
    }

    /// Linear backoff: the wait after failed attempt `n` (1-based) is `base_delay * n`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay,
            attempt_timeout: config.attempt_timeout,
            scope: config.retry_scope,
        }
    }
}

/// How a batch that reached success got there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub attempts: u32,
}

struct AttemptFailure {
    failed: BTreeSet<SourceType>,
    error: Error,
}

/// Runs a batch's per-type pushes with bounded, linearly backed-off retries.
#[derive(Clone)]
pub struct RetryExecutor {
    adapters: HashMap<SourceType, Arc<dyn SourceAdapter>>,
}

impl RetryExecutor {
    pub fn new(adapters: HashMap<SourceType, Arc<dyn SourceAdapter>>) -> Self {
        Self { adapters }
    }

    /// Push every source type present in `batch`, retrying failed attempts.
    ///
    /// One push per distinct type is issued per attempt and the pushes run
    /// concurrently. After failed attempt `n` the executor waits
    /// `base_delay * n` before going on; once `max_retries` attempts have
    /// failed it returns [`Error::RetriesExhausted`] with the last cause.
    pub async fn run_batch(&self, batch: &Batch, policy: &RetryPolicy) -> Result<BatchOutcome> {
        let all_types = batch.source_types();
        let mut outstanding = all_types.clone();
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=policy.max_retries {
            let targets = match policy.scope {
                RetryScope::WholeBatch => &all_types,
                RetryScope::FailedOnly => &outstanding,
            };

            match self.attempt(attempt, targets, policy.attempt_timeout).await {
                Ok(()) => {
                    log::debug!(
                        "Batch {} ({} items) pushed on attempt {attempt}",
                        batch.index + 1,
                        batch.len()
                    );
                    return Ok(BatchOutcome { attempts: attempt });
                }
                Err(failure) => {
                    last_error = failure.error.to_string();
                    outstanding = failure.failed;
                }
            }

            let wait = policy.delay_for_attempt(attempt);
            log::warn!(
                "Batch {} attempt {attempt}/{} failed: {last_error}. Waiting {}ms",
                batch.index + 1,
                policy.max_retries,
                wait.as_millis()
            );
            tokio::time::sleep(wait).await;
        }

        Err(Error::RetriesExhausted {
            attempts: policy.max_retries,
            last_error,
        })
    }

    /// Fan out one push per target type and judge the attempt once all have
    /// finished or the timeout has passed.
    async fn attempt(
        &self,
        attempt: u32,
        targets: &BTreeSet<SourceType>,
        timeout: Option<Duration>,
    ) -> std::result::Result<(), AttemptFailure> {
        let mut errors: Vec<String> = Vec::new();
        let mut succeeded: BTreeSet<SourceType> = BTreeSet::new();
        let mut tasks = JoinSet::new();

        for &source_type in targets {
            match self.adapters.get(&source_type) {
                Some(adapter) => {
                    let adapter = Arc::clone(adapter);
                    tasks.spawn(async move { (source_type, adapter.push_pending().await) });
                }
                None => errors.push(format!("no adapter registered for {source_type}")),
            }
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        let limit = timeout.unwrap_or_default().as_millis();
                        errors.push(format!("timed out after {limit}ms"));
                        tasks.abort_all();
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            match next {
                Some(Ok((source_type, Ok(())))) => {
                    succeeded.insert(source_type);
                }
                Some(Ok((_, Err(e)))) => errors.push(e.to_string()),
                Some(Err(join_error)) => errors.push(format!("push task aborted: {join_error}")),
                None => break,
            }
        }

        let failed: BTreeSet<SourceType> = targets.difference(&succeeded).copied().collect();
        if failed.is_empty() && errors.is_empty() {
            Ok(())
        } else {
            Err(AttemptFailure {
                failed,
                error: Error::BatchAttempt {
                    attempt,
                    message: errors.join("; "),
                },
            })
        }
    }
}
