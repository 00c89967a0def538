use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::sync::item::{SourceType, SyncItem};

/// A fixed-size, ordered slice of the queue executed as one retryable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub index: usize,
    pub items: Vec<SyncItem>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Distinct source types present, in a stable order.
    pub fn source_types(&self) -> BTreeSet<SourceType> {
        self.items.iter().map(|i| i.source_type).collect()
    }
}

/// Split the queue into consecutive batches of at most `batch_size` items.
pub fn partition(queue: Vec<SyncItem>, batch_size: usize) -> Result<Vec<Batch>> {
    if batch_size == 0 {
        return Err(Error::InvalidConfiguration(
            "batch_size must be at least 1".into(),
        ));
    }

    let mut batches = Vec::with_capacity(queue.len().div_ceil(batch_size));
    let mut items = queue.into_iter().peekable();
    while items.peek().is_some() {
        let chunk: Vec<SyncItem> = items.by_ref().take(batch_size).collect();
        batches.push(Batch {
            index: batches.len(),
            items: chunk,
        });
    }
    Ok(batches)
}
