//! One client WebSocket session.
//!
//! A session runs two halves concurrently:
//!
//! - the **receive loop** (this task) reads frames, decodes requests and
//!   spawns one handler task per request. It is the only writer of the
//!   cancel registry, so the registry is a plain `HashMap`. Handler tasks
//!   report back over a channel when they finish and the loop removes
//!   their entry.
//! - the **send loop** (spawned) drains the outbound queue, writes JSON
//!   text frames and pings the client periodically.
//!
//! Teardown cancels every outstanding request, closes the outbound queue
//! and unregisters from the hub, in that order.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use trawl_core::{DatasourceSet, ItemCache};

use crate::config::SessionConfig;
use crate::guard::catch_panic;
use crate::hub::Hub;
use crate::metrics::GatewayMetrics;
use crate::outbound::{Outbound, SessionId, TryOutcome};
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::request::{Batching, RequestContext};
use crate::server::BuildInfo;
use crate::{fields, items, search};

/// State shared by every session of a server.
#[derive(Debug)]
pub struct SessionContext {
    /// Session registry used for broadcasts.
    pub hub: Hub,
    /// Configured datasources.
    pub datasources: Arc<DatasourceSet>,
    /// Session tuning.
    pub config: SessionConfig,
    /// Gateway counters.
    pub metrics: Arc<GatewayMetrics>,
    /// Version reported in the initial state.
    pub build: BuildInfo,
}

impl SessionContext {
    /// The `INITIAL_STATE_RECEIVE` message sent after upgrade.
    #[must_use]
    pub fn initial_state(&self) -> ServerMessage {
        ServerMessage::InitialState {
            datasources: self.datasources.infos(),
            version: self.build.version.clone(),
            commit_id: self.build.commit_id.clone(),
        }
    }
}

/// Runs a session over an upgraded socket until it closes.
pub async fn serve(socket: WebSocket, shared: Arc<SessionContext>) {
    let id = shared.hub.next_session_id();
    let config = shared.config;
    let (outbound, queue) = Outbound::channel(id, config.outbound_capacity);
    let (sink, stream) = socket.split();

    shared.metrics.record_session_open();
    shared.hub.register(outbound.clone());
    info!(session = id, "session opened");

    let _ = outbound.send(shared.initial_state()).await;

    let writer_done = CancellationToken::new();
    let writer = tokio::spawn(send_loop(
        id,
        sink,
        queue,
        outbound.closed_token(),
        config,
        Arc::clone(&shared.metrics),
        writer_done.clone(),
    ));

    let mut session = Session::new(id, outbound.clone(), &shared);
    session.receive_loop(stream, &writer_done).await;

    session.cancel_all();
    outbound.close();
    shared.hub.unregister(id);
    if let Err(e) = writer.await {
        error!(session = id, error = %e, "send loop failed");
    }

    shared.metrics.record_session_close();
    info!(session = id, "session closed");
}

/// Outstanding request entry.
///
/// A canceled entry stays registered until its handler reports back, so
/// the request-id cannot be reused while canceled work is still draining.
struct Pending {
    scope: CancellationToken,
    generation: u64,
    canceled: bool,
}

struct Session {
    id: SessionId,
    outbound: Outbound,
    items: Arc<ItemCache>,
    datasources: Arc<DatasourceSet>,
    batching: Batching,
    pong_wait: std::time::Duration,
    metrics: Arc<GatewayMetrics>,
    /// Parent of every request scope.
    root: CancellationToken,
    registry: HashMap<String, Pending>,
    generation: u64,
    finished_tx: mpsc::UnboundedSender<(String, u64)>,
    finished_rx: mpsc::UnboundedReceiver<(String, u64)>,
}

impl Session {
    fn new(id: SessionId, outbound: Outbound, shared: &SessionContext) -> Self {
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        Self {
            id,
            outbound,
            items: Arc::new(ItemCache::new()),
            datasources: Arc::clone(&shared.datasources),
            batching: Batching::from(&shared.config),
            pong_wait: shared.config.pong_wait(),
            metrics: Arc::clone(&shared.metrics),
            root: CancellationToken::new(),
            registry: HashMap::new(),
            generation: 0,
            finished_tx,
            finished_rx,
        }
    }

    async fn receive_loop(&mut self, mut stream: SplitStream<WebSocket>, writer_done: &CancellationToken) {
        let mut deadline = Instant::now() + self.pong_wait;

        loop {
            tokio::select! {
                biased;

                () = writer_done.cancelled() => {
                    debug!(session = self.id, "send loop ended");
                    break;
                }

                Some((request_id, generation)) = self.finished_rx.recv() => {
                    self.finish(&request_id, generation);
                }

                frame = tokio::time::timeout_at(deadline, stream.next()) => {
                    let message = match frame {
                        Err(_) => {
                            warn!(session = self.id, "read deadline expired");
                            break;
                        }
                        Ok(None) => break,
                        Ok(Some(Err(e))) => {
                            debug!(session = self.id, error = %e, "read failed");
                            break;
                        }
                        Ok(Some(Ok(message))) => message,
                    };

                    match message {
                        Message::Text(text) => self.handle_frame(text.as_str()),
                        Message::Binary(data) => match std::str::from_utf8(&data) {
                            Ok(text) => self.handle_frame(text),
                            Err(_) => {
                                self.metrics.record_frame();
                                self.metrics.record_decode_error();
                                self.reply(ServerMessage::error("", "binary frame is not valid UTF-8"));
                            }
                        },
                        Message::Pong(_) => deadline = Instant::now() + self.pong_wait,
                        Message::Ping(_) => {}
                        Message::Close(_) => break,
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        self.metrics.record_frame();

        let message = match protocol::decode(text) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.record_decode_error();
                warn!(session = self.id, request_id = %e.request_id, error = %e, "invalid frame");
                self.reply(ServerMessage::error(e.request_id, e.message));
                return;
            }
        };

        debug!(
            session = self.id,
            request_id = message.request_id(),
            kind = message.kind(),
            "request received"
        );

        match message {
            ClientMessage::Cancel(cancel) => self.cancel(&cancel.request_id),
            other => self.dispatch(other),
        }
    }

    fn dispatch(&mut self, message: ClientMessage) {
        let request_id = message.request_id().to_string();
        if self.registry.contains_key(&request_id) {
            warn!(session = self.id, request_id = %request_id, "request-id already in use");
            self.reply(ServerMessage::error(
                request_id.clone(),
                format!("request-id {request_id} is already in use"),
            ));
            return;
        }

        let scope = self.root.child_token();
        self.generation += 1;
        let generation = self.generation;
        self.registry.insert(
            request_id.clone(),
            Pending {
                scope: scope.clone(),
                generation,
                canceled: false,
            },
        );
        self.metrics.record_request();

        let ctx = RequestContext {
            request_id: request_id.clone(),
            scope,
            outbound: self.outbound.clone(),
            items: Arc::clone(&self.items),
            datasources: Arc::clone(&self.datasources),
            batching: self.batching,
        };
        let finished = self.finished_tx.clone();
        tokio::spawn(async move {
            catch_panic("request handler", handle(ctx, message)).await;
            let _ = finished.send((request_id, generation));
        });
    }

    fn cancel(&mut self, request_id: &str) {
        match self.registry.get_mut(request_id) {
            Some(pending) if !pending.canceled => {
                pending.canceled = true;
                pending.scope.cancel();
                self.metrics.record_cancel();
                debug!(session = self.id, request_id, "request cancelled");
            }
            Some(_) => debug!(session = self.id, request_id, "request already cancelled"),
            None => debug!(session = self.id, request_id, "cancel for unknown request"),
        }
    }

    fn finish(&mut self, request_id: &str, generation: u64) {
        if self
            .registry
            .get(request_id)
            .is_some_and(|pending| pending.generation == generation)
        {
            self.registry.remove(request_id);
        }
    }

    fn cancel_all(&mut self) {
        self.root.cancel();
        self.registry.clear();
    }

    /// Queues a control reply without waiting for room.
    fn reply(&self, message: ServerMessage) {
        match self.outbound.try_send(message) {
            TryOutcome::Queued => {}
            TryOutcome::Full => {
                self.metrics.record_reply_drop();
                warn!(session = self.id, "reply dropped, outbound queue full");
            }
            TryOutcome::Closed => debug!(session = self.id, "reply dropped, session closed"),
        }
    }
}

async fn handle(ctx: RequestContext, message: ClientMessage) {
    match message {
        ClientMessage::Search(request) => search::run(ctx, request).await,
        ClientMessage::Items(request) => items::run(ctx, request).await,
        ClientMessage::Fields(request) => fields::run(ctx, request).await,
        ClientMessage::Cancel(_) => {}
    }
}

async fn send_loop(
    session: SessionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<ServerMessage>,
    closed: CancellationToken,
    config: SessionConfig,
    metrics: Arc<GatewayMetrics>,
    done: CancellationToken,
) {
    let write_wait = config.write_wait();
    let mut ping = tokio::time::interval_at(
        Instant::now() + config.ping_interval(),
        config.ping_interval(),
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let (frame, len) = tokio::select! {
            biased;

            () = closed.cancelled() => {
                let _ = tokio::time::timeout(write_wait, sink.send(Message::Close(None))).await;
                break;
            }

            message = queue.recv() => {
                let Some(message) = message else {
                    let _ = tokio::time::timeout(write_wait, sink.send(Message::Close(None))).await;
                    break;
                };
                match serde_json::to_string(&message) {
                    Ok(text) => {
                        let len = text.len() as u64;
                        (Message::Text(text.into()), Some(len))
                    }
                    Err(e) => {
                        error!(session, kind = message.kind(), error = %e, "failed to serialize message");
                        continue;
                    }
                }
            }

            _ = ping.tick() => (Message::Ping(Bytes::new()), None),
        };

        match tokio::time::timeout(write_wait, sink.send(frame)).await {
            Ok(Ok(())) => {
                if let Some(len) = len {
                    metrics.record_send(len);
                }
            }
            Ok(Err(e)) => {
                debug!(session, error = %e, "write failed");
                break;
            }
            Err(_) => {
                warn!(session, "write deadline exceeded");
                break;
            }
        }
    }

    done.cancel();
}
