//! Datasource capability consumed by the search pipeline.
//!
//! A [`Datasource`] is an external search backend. The gateway only ever
//! talks to it through this trait: a streaming search that yields raw
//! [`Record`]s plus an independent error stream, and a field introspection
//! call. Backends that accept pushed documents additionally expose
//! [`PushReceiver`], and backends that continuously emit graph nodes
//! expose [`Broadcaster`].
//!
//! ## Streams
//!
//! [`Datasource::search`] returns a [`SearchResponse`] holding two bounded
//! channels. The backend drops its [`SearchSender`] when it is done, which
//! closes both streams. Closure of the item stream is what marks the end
//! of a search; the error stream may close earlier without ending it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::graph::GraphNode;
use crate::record::{Field, Fields, Record};

/// Errors reported by datasources.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatasourceError {
    /// Connection to the backend failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The backend rejected or failed the query.
    #[error("query failed: {0}")]
    Query(String),

    /// The datasource does not support the requested operation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The datasource cannot accept work right now (full queue, shut down).
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Anything else.
    #[error("internal: {0}")]
    Internal(String),
}

/// Parameters of one search call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Backend query string.
    pub query: String,
    /// Field allow-list requested by the client.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Offset of the first record.
    #[serde(default)]
    pub from: usize,
    /// Maximum number of records, `None` for no limit.
    #[serde(default)]
    pub size: Option<usize>,
}

/// Consumer half of a search: the item and error streams.
#[derive(Debug)]
pub struct SearchResponse {
    /// Raw records, closed when the search is exhausted.
    pub items: mpsc::Receiver<Record>,
    /// Backend errors, possibly closed before `items`.
    pub errors: mpsc::Receiver<DatasourceError>,
}

impl SearchResponse {
    /// Creates a connected sender/response pair with `capacity` slots per
    /// stream.
    #[must_use]
    pub fn channel(capacity: usize) -> (SearchSender, Self) {
        let capacity = capacity.max(1);
        let (item_tx, item_rx) = mpsc::channel(capacity);
        let (error_tx, error_rx) = mpsc::channel(capacity);
        (
            SearchSender {
                items: item_tx,
                errors: error_tx,
            },
            Self {
                items: item_rx,
                errors: error_rx,
            },
        )
    }

    /// A response whose streams are already closed.
    #[must_use]
    pub fn empty() -> Self {
        let (_, response) = Self::channel(1);
        response
    }

    /// Splits into `(items, errors)`.
    #[must_use]
    pub fn into_parts(
        self,
    ) -> (
        mpsc::Receiver<Record>,
        mpsc::Receiver<DatasourceError>,
    ) {
        (self.items, self.errors)
    }
}

/// Producer half of a search, held by the backend.
#[derive(Debug, Clone)]
pub struct SearchSender {
    items: mpsc::Sender<Record>,
    errors: mpsc::Sender<DatasourceError>,
}

impl SearchSender {
    /// Emits a record. Returns `false` once the consumer has gone away.
    pub async fn item(&self, record: Record) -> bool {
        self.items.send(record).await.is_ok()
    }

    /// Emits an error. Returns `false` once the consumer has gone away.
    pub async fn error(&self, error: DatasourceError) -> bool {
        self.errors.send(error).await.is_ok()
    }

    /// Whether the consumer dropped the item stream.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.items.is_closed()
    }
}

/// External search backend.
#[async_trait]
pub trait Datasource: Send + Sync {
    /// Backend type name, e.g. `memory`.
    fn kind(&self) -> &str;

    /// Starts a search under `scope`.
    ///
    /// Implementations must stop producing once `scope` is cancelled and
    /// drop their sender so both streams close.
    fn search(&self, scope: CancellationToken, options: SearchOptions) -> SearchResponse;

    /// Lists the fields the backend knows about.
    async fn get_fields(&self, scope: CancellationToken) -> Result<Vec<Field>, DatasourceError>;

    /// Push capability, if supported.
    fn as_receiver(&self) -> Option<&dyn PushReceiver> {
        None
    }

    /// Broadcast capability, if supported.
    fn as_broadcaster(&self) -> Option<&dyn Broadcaster> {
        None
    }
}

/// Datasource that accepts pushed documents.
pub trait PushReceiver: Send + Sync {
    /// Enqueues one flattened document without blocking.
    fn receive(&self, fields: Fields) -> Result<(), DatasourceError>;
}

/// Datasource that emits graph nodes on its own.
pub trait Broadcaster: Send + Sync {
    /// Starts emitting nodes attributed to `datasource` until `scope` is
    /// cancelled. Can only be started once.
    fn broadcast(
        &self,
        datasource: &str,
        scope: CancellationToken,
    ) -> Result<mpsc::Receiver<GraphNode>, DatasourceError>;
}

/// Public description of a configured datasource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasourceInfo {
    /// Configured id, used by clients to address the datasource.
    pub id: String,
    /// Backend type name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human readable name.
    pub name: String,
}

struct DatasourceEntry {
    name: String,
    datasource: Arc<dyn Datasource>,
}

/// Read-only set of configured datasources keyed by id.
#[derive(Default)]
pub struct DatasourceSet {
    entries: BTreeMap<String, DatasourceEntry>,
}

impl DatasourceSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a datasource, replacing any previous one with the same id.
    pub fn insert(
        &mut self,
        id: impl Into<String>,
        name: impl Into<String>,
        datasource: Arc<dyn Datasource>,
    ) {
        self.entries.insert(
            id.into(),
            DatasourceEntry {
                name: name.into(),
                datasource,
            },
        );
    }

    /// Looks up a datasource by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Datasource>> {
        self.entries.get(id).map(|entry| &entry.datasource)
    }

    /// Descriptions of every datasource, ordered by id.
    #[must_use]
    pub fn infos(&self) -> Vec<DatasourceInfo> {
        self.entries
            .iter()
            .map(|(id, entry)| DatasourceInfo {
                id: id.clone(),
                kind: entry.datasource.kind().to_string(),
                name: entry.name.clone(),
            })
            .collect()
    }

    /// Iterates `(id, datasource)` pairs ordered by id.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn Datasource>)> {
        self.entries
            .iter()
            .map(|(id, entry)| (id.as_str(), &entry.datasource))
    }

    /// Number of datasources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for DatasourceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatasourceSet")
            .field("ids", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Static {
        records: Vec<Record>,
    }

    #[async_trait]
    impl Datasource for Static {
        fn kind(&self) -> &str {
            "static"
        }

        fn search(&self, scope: CancellationToken, _options: SearchOptions) -> SearchResponse {
            let (tx, response) = SearchResponse::channel(4);
            let records = self.records.clone();
            tokio::spawn(async move {
                for record in records {
                    if scope.is_cancelled() || !tx.item(record).await {
                        return;
                    }
                }
            });
            response
        }

        async fn get_fields(
            &self,
            _scope: CancellationToken,
        ) -> Result<Vec<Field>, DatasourceError> {
            Ok(vec![Field::new("user", "string")])
        }
    }

    #[tokio::test]
    async fn test_search_streams_close_when_sender_dropped() {
        let ds = Static {
            records: vec![Record::new("1", Fields::new()), Record::new("2", Fields::new())],
        };
        let (mut items, mut errors) = ds
            .search(CancellationToken::new(), SearchOptions::default())
            .into_parts();

        assert_eq!(items.recv().await.unwrap().id, "1");
        assert_eq!(items.recv().await.unwrap().id, "2");
        assert!(items.recv().await.is_none());
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_response_is_closed() {
        let (mut items, mut errors) = SearchResponse::empty().into_parts();
        assert!(items.recv().await.is_none());
        assert!(errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_sender_reports_dropped_consumer() {
        let (tx, response) = SearchResponse::channel(1);
        drop(response);
        assert!(tx.is_closed());
        assert!(!tx.item(Record::new("x", Fields::new())).await);
        assert!(!tx.error(DatasourceError::Query("boom".into())).await);
    }

    #[test]
    fn test_default_capabilities_absent() {
        let ds = Static { records: vec![] };
        assert!(ds.as_receiver().is_none());
        assert!(ds.as_broadcaster().is_none());
    }

    #[test]
    fn test_datasource_set_infos() {
        let mut set = DatasourceSet::new();
        set.insert("b", "Beta", Arc::new(Static { records: vec![] }));
        set.insert("a", "Alpha", Arc::new(Static { records: vec![] }));

        let infos = set.infos();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].id, "a");
        assert_eq!(infos[0].kind, "static");
        assert_eq!(infos[1].name, "Beta");
        assert!(set.get("a").is_some());
        assert!(set.get("c").is_none());

        let json = serde_json::to_value(&infos[0]).unwrap();
        assert_eq!(json["type"], "static");
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            DatasourceError::Query("bad syntax".into()).to_string(),
            "query failed: bad syntax"
        );
    }
}
