//! Aggregated graph nodes and field projection.

use serde::{Deserialize, Serialize};

use crate::record::Fields;

/// Deduplicated aggregation of raw records sharing identical projected
/// field values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Hex content hash of the projected values.
    pub id: String,
    /// Projected fields of the first record that produced this node.
    pub fields: Fields,
    /// Number of raw records collapsed into this node.
    pub count: u64,
    /// Id of the datasource that owns the node.
    pub datasource: String,
}

/// Keeps only the allow-listed fields of a record.
///
/// Names missing from `fields` are skipped. The result is empty when no
/// allow-listed field is present, or when `allow` itself is empty.
#[must_use]
pub fn project(fields: &Fields, allow: &[String]) -> Fields {
    let mut projected = Fields::new();
    for name in allow {
        if let Some(value) = fields.get(name) {
            projected.insert(name.clone(), value.clone());
        }
    }
    projected
}
