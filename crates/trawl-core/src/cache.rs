//! Session-scoped cache of raw records per graph node.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::record::Record;

/// Append-only map from graph-node id to the raw records that produced it.
///
/// Shared by every search worker of a session; entries live as long as the
/// session and are never evicted.
#[derive(Debug, Default)]
pub struct ItemCache {
    entries: RwLock<HashMap<String, Vec<Record>>>,
}

impl ItemCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record under `node_id`, preserving arrival order.
    pub fn append(&self, node_id: &str, record: Record) {
        let mut entries = self.entries.write();
        match entries.get_mut(node_id) {
            Some(records) => records.push(record),
            None => {
                entries.insert(node_id.to_string(), vec![record]);
            }
        }
    }

    /// Returns a copy of the records cached under `node_id`.
    #[must_use]
    pub fn get(&self, node_id: &str) -> Option<Vec<Record>> {
        self.entries.read().get(node_id).cloned()
    }

    /// Number of cached node ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing has been cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Total number of cached records across all nodes.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }
}
