//! HTTP front end.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/ws` | Upgrade to a search session |
//! | `POST` | `/submit?datasource=<id>` | Push a JSON document to a push datasource |
//! | `GET` | `/api/v1/stats` | Gateway counters |

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use trawl_core::{DatasourceError, DatasourceSet, GraphNode};
use trawl_datasources::flatten;

use crate::config::ServerConfig;
use crate::error::GatewayError;
use crate::hub::Hub;
use crate::metrics::{GatewayMetrics, MetricsSnapshot};
use crate::protocol::ServerMessage;
use crate::session::{self, SessionContext};

/// Version information reported to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    /// Crate version.
    pub version: String,
    /// Commit the binary was built from.
    pub commit_id: String,
}

impl BuildInfo {
    /// Version of this build; the commit comes from `TRAWL_COMMIT_ID` at
    /// compile time.
    #[must_use]
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit_id: option_env!("TRAWL_COMMIT_ID")
                .unwrap_or("unknown")
                .to_string(),
        }
    }
}

/// Application state shared across all handlers.
pub type AppState = Arc<SessionContext>;

/// Creates the gateway router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(upgrade))
        .route("/submit", post(submit))
        .route("/api/v1/stats", get(stats))
        .with_state(state)
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: msg.into() })).into_response()
}

/// `GET /ws` — upgrade to a session.
async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let limit = state.config.max_message_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| session::serve(socket, state))
}

#[derive(Debug, Deserialize)]
struct SubmitParams {
    datasource: String,
}

/// `POST /submit?datasource=<id>` — push one document.
async fn submit(
    State(state): State<AppState>,
    Query(params): Query<SubmitParams>,
    body: Bytes,
) -> Response {
    let Some(datasource) = state.datasources.get(&params.datasource) else {
        return error_response(
            StatusCode::NOT_FOUND,
            format!("unknown datasource: {}", params.datasource),
        );
    };
    let Some(receiver) = datasource.as_receiver() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("datasource {} does not accept documents", params.datasource),
        );
    };

    let document: Value = match serde_json::from_slice(&body) {
        Ok(document) => document,
        Err(e) => {
            debug!(datasource = %params.datasource, error = %e, "submit could not parse body");
            return error_response(StatusCode::BAD_REQUEST, format!("invalid JSON: {e}"));
        }
    };
    let Value::Object(object) = document else {
        return error_response(StatusCode::BAD_REQUEST, "document must be a JSON object");
    };

    let fields = flatten(&object);
    if fields.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    match receiver.receive(fields) {
        Ok(()) => {
            state.metrics.record_submit();
            StatusCode::ACCEPTED.into_response()
        }
        Err(e @ DatasourceError::Unavailable(_)) => {
            warn!(datasource = %params.datasource, error = %e, "submit rejected");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Stats response: live session count plus counters.
#[derive(Debug, Serialize)]
struct StatsResponse {
    sessions: usize,
    datasources: usize,
    #[serde(flatten)]
    metrics: MetricsSnapshot,
}

/// `GET /api/v1/stats` — gateway counters.
async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse {
        sessions: state.hub.session_count().await,
        datasources: state.datasources.len(),
        metrics: state.metrics.snapshot(),
    })
}

/// A bound, not yet running gateway.
#[derive(Debug)]
pub struct Gateway {
    state: AppState,
    listener: TcpListener,
}

impl Gateway {
    /// Binds the listener and spawns the hub.
    pub async fn bind(config: &ServerConfig, datasources: DatasourceSet) -> Result<Self, GatewayError> {
        let address = config.socket_addr()?;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| GatewayError::Bind {
                address: config.address.clone(),
                source,
            })?;

        let metrics = Arc::new(GatewayMetrics::new());
        let (hub, _dispatch) = Hub::spawn(Arc::clone(&metrics));
        let state = Arc::new(SessionContext {
            hub,
            datasources: Arc::new(datasources),
            config: config.session,
            metrics,
            build: BuildInfo::current(),
        });

        Ok(Self { state, listener })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, GatewayError> {
        self.listener.local_addr().map_err(GatewayError::Serve)
    }

    /// Shared state, for inspection.
    #[must_use]
    pub fn state(&self) -> AppState {
        Arc::clone(&self.state)
    }

    /// Serves until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), GatewayError> {
        let broadcasts = shutdown.child_token();
        start_broadcasters(&self.state, &broadcasts);

        let addr = self.local_addr()?;
        info!(address = %addr, datasources = self.state.datasources.len(), "gateway listening");

        let app = router(Arc::clone(&self.state));
        let result = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(GatewayError::Serve);

        broadcasts.cancel();
        info!("gateway stopped");
        result
    }
}

/// Starts every datasource that can broadcast and forwards its nodes to
/// the hub as `LIVE_RECEIVE`.
fn start_broadcasters(state: &AppState, scope: &CancellationToken) {
    for (id, datasource) in state.datasources.iter() {
        let Some(broadcaster) = datasource.as_broadcaster() else {
            continue;
        };
        match broadcaster.broadcast(id, scope.clone()) {
            Ok(nodes) => {
                info!(datasource = %id, "broadcast started");
                tokio::spawn(forward(
                    id.to_string(),
                    nodes,
                    state.hub.clone(),
                    state.config.max_batch_size,
                ));
            }
            Err(e) => warn!(datasource = %id, error = %e, "broadcast not started"),
        }
    }
}

/// Wraps nodes in `LIVE_RECEIVE`, coalescing whatever is already queued up
/// to `max_batch` nodes per message.
async fn forward(
    datasource: String,
    mut nodes: mpsc::Receiver<GraphNode>,
    hub: Hub,
    max_batch: usize,
) {
    let max_batch = max_batch.max(1);
    while let Some(node) = nodes.recv().await {
        let mut graphs = vec![node];
        while graphs.len() < max_batch {
            match nodes.try_recv() {
                Ok(node) => graphs.push(node),
                Err(_) => break,
            }
        }
        hub.broadcast(ServerMessage::LiveReceive {
            datasource: datasource.clone(),
            graphs,
        });
    }
    debug!(datasource = %datasource, "broadcast forwarder stopped");
}
