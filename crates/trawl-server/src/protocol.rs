//! Session wire protocol.
//!
//! Every frame is a JSON object tagged with `"type"`. Client requests carry
//! a client-chosen `"request-id"` that correlates every server message
//! produced for that request. Decoding peeks the envelope first so a
//! malformed request can still be answered with an `ERROR` keyed to the
//! request-id it tried to use.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use trawl_core::{DatasourceInfo, Field, GraphNode, Record};

/// Messages sent from a client to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Fan a query out to one or more datasources.
    #[serde(rename = "SEARCH_REQUEST")]
    Search(SearchRequest),
    /// Fetch the raw records behind graph nodes.
    #[serde(rename = "ITEMS_REQUEST")]
    Items(ItemsRequest),
    /// Introspect the fields of one or more datasources.
    #[serde(rename = "FIELDS_REQUEST")]
    Fields(FieldsRequest),
    /// Cancel the outstanding request with the same request-id.
    #[serde(rename = "CANCEL_REQUEST")]
    Cancel(CancelRequest),
}

impl ClientMessage {
    /// Request-id the message refers to.
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::Search(r) => &r.request_id,
            Self::Items(r) => &r.request_id,
            Self::Fields(r) => &r.request_id,
            Self::Cancel(r) => &r.request_id,
        }
    }

    /// Wire name of the message type.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Search(_) => "SEARCH_REQUEST",
            Self::Items(_) => "ITEMS_REQUEST",
            Self::Fields(_) => "FIELDS_REQUEST",
            Self::Cancel(_) => "CANCEL_REQUEST",
        }
    }
}

/// `SEARCH_REQUEST` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchRequest {
    /// Correlation id.
    #[serde(rename = "request-id")]
    pub request_id: String,
    /// Target datasource ids.
    #[serde(default)]
    pub datasources: Vec<String>,
    /// Single target datasource, accepted alongside `datasources`.
    #[serde(default)]
    pub datasource: Option<String>,
    /// Field allow-list used for projection and hashing.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Backend query string.
    #[serde(default)]
    pub query: String,
    /// Offset of the first record.
    #[serde(default)]
    pub from: usize,
    /// Maximum records per datasource.
    #[serde(default)]
    pub size: Option<usize>,
}

impl SearchRequest {
    /// All targeted datasource ids, deduplicated, in request order.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = Vec::with_capacity(self.datasources.len() + 1);
        for id in self.datasources.iter().chain(self.datasource.iter()) {
            if !id.is_empty() && !targets.contains(id) {
                targets.push(id.clone());
            }
        }
        targets
    }
}

/// `ITEMS_REQUEST` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ItemsRequest {
    /// Correlation id.
    #[serde(rename = "request-id")]
    pub request_id: String,
    /// Graph node ids to fetch.
    #[serde(default)]
    pub items: Vec<String>,
}

/// `FIELDS_REQUEST` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FieldsRequest {
    /// Correlation id.
    #[serde(rename = "request-id")]
    pub request_id: String,
    /// Datasource ids to introspect.
    #[serde(default)]
    pub datasources: Vec<String>,
}

/// `CANCEL_REQUEST` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CancelRequest {
    /// Request-id to cancel.
    #[serde(rename = "request-id")]
    pub request_id: String,
}

/// A frame that could not be decoded into a [`ClientMessage`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DecodeError {
    /// Request-id recovered from the envelope, empty if none.
    pub request_id: String,
    /// What went wrong.
    pub message: String,
}

/// Decodes a text frame.
///
/// The frame is first parsed as a generic JSON value to recover the
/// request-id, then dispatched on `type`.
pub fn decode(text: &str) -> Result<ClientMessage, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(|e| DecodeError {
        request_id: String::new(),
        message: format!("malformed message: {e}"),
    })?;

    let request_id = value
        .get("request-id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    serde_json::from_value(value).map_err(|e| DecodeError {
        request_id,
        message: format!("invalid request: {e}"),
    })
}

/// Messages sent from the gateway to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Sent once right after the upgrade.
    #[serde(rename = "INITIAL_STATE_RECEIVE")]
    InitialState {
        /// Configured datasources.
        datasources: Vec<DatasourceInfo>,
        /// Gateway version.
        version: String,
        /// Build commit id.
        #[serde(rename = "commit-id")]
        commit_id: String,
    },
    /// A batch of graph nodes from one datasource.
    #[serde(rename = "SEARCH_RECEIVE")]
    SearchReceive {
        /// Correlation id.
        #[serde(rename = "request-id")]
        request_id: String,
        /// Datasource that produced the nodes.
        datasource: String,
        /// Query echoed back.
        query: String,
        /// Node snapshots, in emission order.
        results: Vec<GraphNode>,
    },
    /// Raw records cached under one graph node.
    #[serde(rename = "ITEMS_RECEIVE")]
    ItemsReceive {
        /// Correlation id.
        #[serde(rename = "request-id")]
        request_id: String,
        /// Node the records belong to.
        #[serde(rename = "item-id")]
        item_id: String,
        /// Records in arrival order.
        items: Vec<Record>,
    },
    /// Field introspection result of one datasource.
    #[serde(rename = "FIELDS_RECEIVE")]
    FieldsReceive {
        /// Correlation id.
        #[serde(rename = "request-id")]
        request_id: String,
        /// Introspected datasource.
        datasource: String,
        /// Advertised fields.
        fields: Vec<Field>,
    },
    /// The request (or one of its datasource workers) was cancelled.
    #[serde(rename = "REQUEST_CANCELED")]
    RequestCanceled {
        /// Correlation id.
        #[serde(rename = "request-id")]
        request_id: String,
        /// Worker datasource, for search requests.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        datasource: Option<String>,
    },
    /// The request (or one of its datasource workers) finished.
    #[serde(rename = "REQUEST_COMPLETED")]
    RequestCompleted {
        /// Correlation id.
        #[serde(rename = "request-id")]
        request_id: String,
        /// Worker datasource, for search requests.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        datasource: Option<String>,
    },
    /// A request-scoped failure.
    #[serde(rename = "ERROR")]
    Error {
        /// Correlation id, empty when it could not be recovered.
        #[serde(rename = "request-id")]
        request_id: String,
        /// Human readable description.
        message: String,
        /// Datasource the failure concerns, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        datasource: Option<String>,
    },
    /// Nodes pushed by a broadcasting datasource, delivered to every session.
    #[serde(rename = "LIVE_RECEIVE")]
    LiveReceive {
        /// Broadcasting datasource.
        datasource: String,
        /// Node snapshots.
        graphs: Vec<GraphNode>,
    },
}

impl ServerMessage {
    /// Request-scoped error without a datasource.
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            request_id: request_id.into(),
            message: message.into(),
            datasource: None,
        }
    }

    /// Request-scoped error attributed to a datasource.
    pub fn datasource_error(
        request_id: impl Into<String>,
        datasource: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Error {
            request_id: request_id.into(),
            message: message.into(),
            datasource: Some(datasource.into()),
        }
    }

    /// Cancellation terminal.
    pub fn canceled(request_id: impl Into<String>, datasource: Option<String>) -> Self {
        Self::RequestCanceled {
            request_id: request_id.into(),
            datasource,
        }
    }

    /// Completion terminal.
    pub fn completed(request_id: impl Into<String>, datasource: Option<String>) -> Self {
        Self::RequestCompleted {
            request_id: request_id.into(),
            datasource,
        }
    }

    /// Correlation id, `None` for unsolicited messages.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::SearchReceive { request_id, .. }
            | Self::ItemsReceive { request_id, .. }
            | Self::FieldsReceive { request_id, .. }
            | Self::RequestCanceled { request_id, .. }
            | Self::RequestCompleted { request_id, .. }
            | Self::Error { request_id, .. } => Some(request_id),
            Self::InitialState { .. } | Self::LiveReceive { .. } => None,
        }
    }

    /// Wire name of the message type.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InitialState { .. } => "INITIAL_STATE_RECEIVE",
            Self::SearchReceive { .. } => "SEARCH_RECEIVE",
            Self::ItemsReceive { .. } => "ITEMS_RECEIVE",
            Self::FieldsReceive { .. } => "FIELDS_RECEIVE",
            Self::RequestCanceled { .. } => "REQUEST_CANCELED",
            Self::RequestCompleted { .. } => "REQUEST_COMPLETED",
            Self::Error { .. } => "ERROR",
            Self::LiveReceive { .. } => "LIVE_RECEIVE",
        }
    }
}
