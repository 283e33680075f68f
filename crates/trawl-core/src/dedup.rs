//! Per-execution deduplication and batching.
//!
//! A [`DedupIndex`] lives for exactly one (request, datasource) execution.
//! It is never shared, so identical content in two concurrent executions
//! produces two independent nodes with independent counts.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::graph::GraphNode;
use crate::hash::{content_hash, ContentHash};
use crate::record::Fields;

/// Maps content hashes to the graph node they resolve to.
#[derive(Debug)]
pub struct DedupIndex {
    datasource: String,
    nodes: HashMap<ContentHash, GraphNode>,
}

impl DedupIndex {
    /// Creates an empty index for nodes owned by `datasource`.
    #[must_use]
    pub fn new(datasource: impl Into<String>) -> Self {
        Self {
            datasource: datasource.into(),
            nodes: HashMap::new(),
        }
    }

    /// Resolves `hash` to its node, creating it with `fields` on first
    /// sight and incrementing its count on every repeat.
    pub fn resolve(&mut self, hash: ContentHash, fields: Fields) -> &GraphNode {
        match self.nodes.entry(hash) {
            Entry::Occupied(entry) => {
                let node = entry.into_mut();
                node.count += 1;
                node
            }
            Entry::Vacant(entry) => entry.insert(GraphNode {
                id: hash.to_hex(),
                fields,
                count: 1,
                datasource: self.datasource.clone(),
            }),
        }
    }

    /// Hashes an already projected field map and resolves it.
    ///
    /// Values are hashed in sorted key order whatever the map's own order.
    /// Returns `None` for an empty projection: it carries no information
    /// and is discarded before hashing.
    pub fn observe(&mut self, projected: Fields) -> Option<&GraphNode> {
        if projected.is_empty() {
            return None;
        }
        let mut entries: Vec<_> = projected.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        let hash = content_hash(entries.into_iter().map(|(_, value)| value));
        Some(self.resolve(hash, projected))
    }

    /// Looks up a node without touching its count.
    #[must_use]
    pub fn get(&self, hash: &ContentHash) -> Option<&GraphNode> {
        self.nodes.get(hash)
    }

    /// Number of distinct nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node has been resolved yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Outgoing batch of node snapshots, bounded by `limit`.
#[derive(Debug)]
pub struct Batch {
    nodes: Vec<GraphNode>,
    limit: usize,
}

impl Batch {
    /// Creates an empty batch that reports full at `limit` nodes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            nodes: Vec::with_capacity(limit),
            limit,
        }
    }

    /// Appends a node snapshot.
    pub fn push(&mut self, node: GraphNode) {
        self.nodes.push(node);
    }

    /// Whether the batch reached its limit and should be flushed.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.limit
    }

    /// Whether the batch holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of pending nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Drains the batch, leaving it empty.
    pub fn take(&mut self) -> Vec<GraphNode> {
        std::mem::replace(&mut self.nodes, Vec::with_capacity(self.limit))
    }
}
