//! Push datasource fed through `/submit`.
//!
//! [`LiveDatasource`] accepts flattened documents via [`PushReceiver`] into
//! a bounded queue. Once broadcasting starts, a background task drains the
//! queue, deduplicates every document over all of its values and emits a
//! [`GraphNode`] snapshot per document. Searches against a live datasource
//! return immediately closed streams; its data only flows out through
//! broadcasts.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use trawl_core::{
    Broadcaster, Datasource, DatasourceError, DedupIndex, Field, Fields, GraphNode, PushReceiver,
    SearchOptions, SearchResponse,
};

use crate::flatten::type_name;

/// Type name under which the live datasource registers.
pub const KIND: &str = "live";

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Options of a `live` datasource table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiveOptions {
    /// Capacity of the ingest queue and of the node stream.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Datasource receiving pushed documents.
pub struct LiveDatasource {
    tx: mpsc::Sender<Fields>,
    rx: Mutex<Option<mpsc::Receiver<Fields>>>,
    /// Field paths seen so far with the type of their first value.
    seen: RwLock<BTreeMap<String, &'static str>>,
    received: AtomicU64,
    capacity: usize,
}

impl LiveDatasource {
    /// Creates a live datasource.
    #[must_use]
    pub fn new(options: &LiveOptions) -> Self {
        let capacity = options.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            seen: RwLock::new(BTreeMap::new()),
            received: AtomicU64::new(0),
            capacity,
        }
    }

    /// Number of documents accepted so far.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for LiveDatasource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveDatasource")
            .field("capacity", &self.capacity)
            .field("received", &self.received())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Datasource for LiveDatasource {
    fn kind(&self) -> &str {
        KIND
    }

    fn search(&self, _scope: CancellationToken, _options: SearchOptions) -> SearchResponse {
        SearchResponse::empty()
    }

    async fn get_fields(&self, _scope: CancellationToken) -> Result<Vec<Field>, DatasourceError> {
        Ok(self
            .seen
            .read()
            .iter()
            .map(|(path, kind)| Field::new(path.clone(), *kind))
            .collect())
    }

    fn as_receiver(&self) -> Option<&dyn PushReceiver> {
        Some(self)
    }

    fn as_broadcaster(&self) -> Option<&dyn Broadcaster> {
        Some(self)
    }
}

impl PushReceiver for LiveDatasource {
    fn receive(&self, fields: Fields) -> Result<(), DatasourceError> {
        {
            let seen = self.seen.upgradable_read();
            if fields.keys().any(|path| !seen.contains_key(path)) {
                let mut seen = parking_lot::RwLockUpgradableReadGuard::upgrade(seen);
                for (path, value) in &fields {
                    seen.entry(path.clone()).or_insert_with(|| type_name(value));
                }
            }
        }

        match self.tx.try_send(fields) {
            Ok(()) => {
                self.received.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(DatasourceError::Unavailable(format!(
                "ingest queue full ({} documents)",
                self.capacity
            ))),
            Err(TrySendError::Closed(_)) => Err(DatasourceError::Unavailable(
                "ingest queue closed".into(),
            )),
        }
    }
}

impl Broadcaster for LiveDatasource {
    fn broadcast(
        &self,
        datasource: &str,
        scope: CancellationToken,
    ) -> Result<mpsc::Receiver<GraphNode>, DatasourceError> {
        let Some(mut rx) = self.rx.lock().take() else {
            return Err(DatasourceError::Unavailable(format!(
                "{datasource} is already broadcasting"
            )));
        };

        let (out_tx, out_rx) = mpsc::channel(self.capacity);
        let datasource = datasource.to_string();

        tokio::spawn(async move {
            let mut index = DedupIndex::new(datasource.clone());
            info!(datasource = %datasource, "live broadcast started");

            loop {
                let fields = tokio::select! {
                    biased;
                    () = scope.cancelled() => break,
                    fields = rx.recv() => match fields {
                        Some(fields) => fields,
                        None => break,
                    },
                };

                let Some(node) = index.observe(fields) else {
                    debug!(datasource = %datasource, "dropping document without values");
                    continue;
                };
                let node = node.clone();

                tokio::select! {
                    biased;
                    () = scope.cancelled() => break,
                    sent = out_tx.send(node) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }

            info!(datasource = %datasource, nodes = index.len(), "live broadcast stopped");
        });

        Ok(out_rx)
    }
}
