//! # Trawl Core
//!
//! Shared building blocks for the Trawl aggregation gateway: raw records,
//! content-hashed graph nodes, the per-execution deduplication engine,
//! the session item cache, and the datasource capability every backend
//! implements.

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod cache;
pub mod datasource;
pub mod dedup;
pub mod graph;
pub mod hash;
pub mod record;

pub use cache::ItemCache;
pub use datasource::{
    Broadcaster, Datasource, DatasourceError, DatasourceInfo, DatasourceSet, PushReceiver,
    SearchOptions, SearchResponse, SearchSender,
};
pub use dedup::{Batch, DedupIndex};
pub use graph::{project, GraphNode};
pub use hash::{content_hash, ContentHash, Fnv128};
pub use record::{Field, Fields, Record};
