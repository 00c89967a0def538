use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::sync::item::{SourceAdapter, SourceType, SyncItem};

/// Registered source adapters, in registration order.
///
/// Builds the globally ordered queue for a run and hands adapters to the
/// retry executor by source type.
#[derive(Clone, Default)]
pub struct QueueBuilder {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter. One adapter per source type, since the executor
    /// issues exactly one push per type.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) -> Result<()> {
        let source_type = adapter.source_type();
        if self.adapters.iter().any(|a| a.source_type() == source_type) {
            return Err(Error::InvalidConfiguration(format!(
                "an adapter for {source_type} is already registered"
            )));
        }
        self.adapters.push(adapter);
        Ok(())
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Result<Self> {
        self.register(adapter)?;
        Ok(self)
    }

    pub fn adapters(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.adapters
    }

    pub fn adapter_map(&self) -> HashMap<SourceType, Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .map(|a| (a.source_type(), Arc::clone(a)))
            .collect()
    }

    /// Collect every adapter's pending records into one ordered queue.
    ///
    /// Order: priority (High first), then `captured_at` newest first, then
    /// registration and enumeration order. An adapter that cannot report its
    /// records contributes nothing to this run.
    pub async fn build(&self) -> Vec<SyncItem> {
        let built_at = Utc::now();
        let mut queue = Vec::new();

        for adapter in &self.adapters {
            match read_adapter(adapter.as_ref()).await {
                Ok(records) => {
                    let source_type = adapter.source_type();
                    let priority = adapter.priority();
                    log::debug!("{source_type}: {} pending records", records.len());
                    queue.extend(records.into_iter().map(|record| {
                        SyncItem::from_record(record, source_type, priority, built_at)
                    }));
                }
                Err(e) => log::warn!("Skipping adapter this run: {e}"),
            }
        }

        // sort_by_key is stable, so equal keys keep insertion order
        queue.sort_by_key(|item| (item.priority, Reverse(item.captured_at)));
        queue
    }

    /// Number of records currently pending across all readable adapters.
    pub async fn pending_count(&self) -> usize {
        let mut total = 0;
        for adapter in &self.adapters {
            match read_adapter(adapter.as_ref()).await {
                Ok(records) => total += records.len(),
                Err(e) => log::warn!("{e}"),
            }
        }
        total
    }
}

async fn read_adapter(
    adapter: &dyn SourceAdapter,
) -> Result<Vec<crate::sync::item::PendingRecord>> {
    let source_type = adapter.source_type();
    let as_read_error = |e: Error| Error::AdapterRead {
        source_type,
        message: e.to_string(),
    };

    if !adapter.has_pending().await.map_err(as_read_error)? {
        return Ok(Vec::new());
    }
    adapter.list_pending().await.map_err(as_read_error)
}
