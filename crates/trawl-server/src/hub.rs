//! Registry of live sessions for out-of-band broadcast.
//!
//! The session map is owned by a single dispatch task. Sessions and
//! broadcasters talk to it through an unbounded command channel, so no lock
//! guards the map and a [`Hub`] handle can be cloned freely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics::GatewayMetrics;
use crate::outbound::{Outbound, SessionId, TryOutcome};
use crate::protocol::ServerMessage;

enum Command {
    Register(Outbound),
    Unregister(SessionId),
    Broadcast(ServerMessage),
    Count(oneshot::Sender<usize>),
}

/// Handle to the hub dispatch task.
#[derive(Debug, Clone)]
pub struct Hub {
    tx: mpsc::UnboundedSender<Command>,
    next_id: Arc<AtomicU64>,
}

impl Hub {
    /// Spawns the dispatch task.
    ///
    /// The task stops once every handle is dropped.
    #[must_use]
    pub fn spawn(metrics: Arc<GatewayMetrics>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(dispatch(rx, metrics));
        (
            Self {
                tx,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            handle,
        )
    }

    /// Allocates a fresh session id.
    #[must_use]
    pub fn next_session_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Adds a session. Replaces any previous queue with the same id.
    pub fn register(&self, outbound: Outbound) {
        self.command(Command::Register(outbound));
    }

    /// Removes a session and closes its outbound queue. No-op if absent.
    pub fn unregister(&self, session: SessionId) {
        self.command(Command::Unregister(session));
    }

    /// Delivers a message to every registered session without waiting on
    /// any of them.
    pub fn broadcast(&self, message: ServerMessage) {
        self.command(Command::Broadcast(message));
    }

    /// Number of registered sessions, or 0 if the hub has stopped.
    pub async fn session_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Count(tx));
        rx.await.unwrap_or(0)
    }

    fn command(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("hub stopped, command dropped");
        }
    }
}

async fn dispatch(mut rx: mpsc::UnboundedReceiver<Command>, metrics: Arc<GatewayMetrics>) {
    let mut sessions: HashMap<SessionId, Outbound> = HashMap::new();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Register(outbound) => {
                debug!(session = outbound.session(), "session registered");
                sessions.insert(outbound.session(), outbound);
            }
            Command::Unregister(session) => {
                if let Some(outbound) = sessions.remove(&session) {
                    outbound.close();
                    debug!(session, "session unregistered");
                }
            }
            Command::Broadcast(message) => {
                let mut closed: Vec<SessionId> = Vec::new();
                for (&session, outbound) in &sessions {
                    match outbound.try_send(message.clone()) {
                        TryOutcome::Queued => {}
                        TryOutcome::Full => {
                            metrics.record_broadcast_drop();
                            warn!(session, kind = message.kind(), "session queue full, broadcast dropped");
                        }
                        TryOutcome::Closed => closed.push(session),
                    }
                }
                for session in closed {
                    sessions.remove(&session);
                    debug!(session, "closed session removed");
                }
            }
            Command::Count(reply) => {
                let _ = reply.send(sessions.len());
            }
        }
    }

    for outbound in sessions.values() {
        outbound.close();
    }
    debug!("hub dispatch stopped");
}
