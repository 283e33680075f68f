//! Shared state handed to every request handler.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use trawl_core::{DatasourceSet, ItemCache};

use crate::config::SessionConfig;
use crate::outbound::{Outbound, SessionClosed};
use crate::protocol::ServerMessage;

/// Batch tuning for search workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batching {
    /// Nodes per `SEARCH_RECEIVE`.
    pub max_batch_size: usize,
    /// Period of the partial flush.
    pub flush_interval: Duration,
}

impl From<&SessionConfig> for Batching {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size,
            flush_interval: config.flush_interval(),
        }
    }
}

impl Default for Batching {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// Why a send did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// The request scope was cancelled first.
    Canceled,
    /// The session is gone.
    Closed,
}

impl From<SessionClosed> for Interrupted {
    fn from(_: SessionClosed) -> Self {
        Self::Closed
    }
}

/// Everything a handler needs to serve one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Client-chosen correlation id.
    pub request_id: String,
    /// Cancelled by `CANCEL_REQUEST` or session teardown.
    pub scope: CancellationToken,
    /// Session outbound queue.
    pub outbound: Outbound,
    /// Session item cache.
    pub items: Arc<ItemCache>,
    /// Configured datasources.
    pub datasources: Arc<DatasourceSet>,
    /// Search batch tuning.
    pub batching: Batching,
}

impl RequestContext {
    /// Enqueues a message, waiting for queue room.
    pub async fn send(&self, message: ServerMessage) -> Result<(), SessionClosed> {
        self.outbound.send(message).await
    }

    /// Enqueues a message unless the request is cancelled while waiting.
    pub async fn send_or_cancel(&self, message: ServerMessage) -> Result<(), Interrupted> {
        if self.scope.is_cancelled() {
            return Err(Interrupted::Canceled);
        }
        tokio::select! {
            biased;
            () = self.scope.cancelled() => Err(Interrupted::Canceled),
            sent = self.outbound.send(message) => sent.map_err(Interrupted::from),
        }
    }

    /// Sends the cancellation terminal, attributed to `datasource` if given.
    pub async fn canceled(&self, datasource: Option<String>) {
        let _ = self
            .send(ServerMessage::canceled(&self.request_id, datasource))
            .await;
    }

    /// Sends the completion terminal, attributed to `datasource` if given.
    pub async fn completed(&self, datasource: Option<String>) {
        let _ = self
            .send(ServerMessage::completed(&self.request_id, datasource))
            .await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use trawl_core::{Datasource, DatasourceError, Field, Record, SearchOptions, SearchResponse};

    /// Context wired to an in-memory outbound queue.
    pub(crate) fn context(
        request_id: &str,
        datasources: DatasourceSet,
        batching: Batching,
    ) -> (RequestContext, mpsc::Receiver<ServerMessage>) {
        let (outbound, rx) = Outbound::channel(1, 1024);
        (
            RequestContext {
                request_id: request_id.to_string(),
                scope: CancellationToken::new(),
                outbound,
                items: Arc::new(ItemCache::new()),
                datasources: Arc::new(datasources),
                batching,
            },
            rx,
        )
    }

    /// Drains every message already queued, waiting briefly for stragglers.
    pub(crate) async fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(Some(message)) =
            tokio::time::timeout(Duration::from_millis(200), rx.recv()).await
        {
            out.push(message);
        }
        out
    }

    /// Datasource replaying a fixed script.
    pub(crate) struct Scripted {
        records: Vec<Record>,
        error: Option<DatasourceError>,
        hold_open: bool,
        panics: bool,
        fields: Result<Vec<Field>, DatasourceError>,
        fields_delay: Option<Duration>,
    }

    impl Scripted {
        pub(crate) fn records(records: Vec<Record>) -> Self {
            Self {
                records,
                error: None,
                hold_open: false,
                panics: false,
                fields: Ok(Vec::new()),
                fields_delay: None,
            }
        }

        pub(crate) fn panicking() -> Self {
            Self {
                panics: true,
                ..Self::records(Vec::new())
            }
        }

        /// Keeps the streams open until the scope is cancelled.
        pub(crate) fn hold_open(mut self) -> Self {
            self.hold_open = true;
            self
        }

        pub(crate) fn fail_with(mut self, error: DatasourceError) -> Self {
            self.error = Some(error);
            self
        }

        pub(crate) fn with_fields(mut self, fields: Result<Vec<Field>, DatasourceError>) -> Self {
            self.fields = fields;
            self
        }

        pub(crate) fn fields_delay(mut self, delay: Duration) -> Self {
            self.fields_delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl Datasource for Scripted {
        fn kind(&self) -> &str {
            "scripted"
        }

        fn search(&self, scope: CancellationToken, _options: SearchOptions) -> SearchResponse {
            assert!(!self.panics, "scripted datasource exploded");

            let (tx, response) = SearchResponse::channel(16);
            let records = self.records.clone();
            let error = self.error.clone();
            let hold_open = self.hold_open;
            tokio::spawn(async move {
                for record in records {
                    if !tx.item(record).await {
                        return;
                    }
                }
                if let Some(error) = error {
                    tx.error(error).await;
                }
                if hold_open {
                    scope.cancelled().await;
                }
            });
            response
        }

        async fn get_fields(
            &self,
            scope: CancellationToken,
        ) -> Result<Vec<Field>, DatasourceError> {
            if let Some(delay) = self.fields_delay {
                tokio::select! {
                    () = scope.cancelled() => {
                        return Err(DatasourceError::Unavailable("cancelled".into()));
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
            self.fields.clone()
        }
    }
}
