//! Per-session outbound queue.
//!
//! Producers (request handlers, search workers, the hub) push
//! [`ServerMessage`]s into a bounded queue drained by the session's send
//! loop. A full queue blocks [`Outbound::send`] so slow clients push back
//! on the workers feeding them. The hub and the session's control replies
//! use [`Outbound::try_send`] instead and never wait.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::protocol::ServerMessage;

/// Numeric session identifier, unique per server.
pub type SessionId = u64;

/// The session was closed; nothing more will be written to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session closed")]
pub struct SessionClosed;

/// Outcome of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryOutcome {
    /// The message was queued.
    Queued,
    /// The queue was full; the message was dropped.
    Full,
    /// The session is closed.
    Closed,
}

/// Cloneable handle to a session's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbound {
    session: SessionId,
    tx: mpsc::Sender<ServerMessage>,
    closed: CancellationToken,
}

impl Outbound {
    /// Creates a queue with `capacity` slots and returns the handle together
    /// with the receiving end for the send loop.
    #[must_use]
    pub fn channel(session: SessionId, capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                session,
                tx,
                closed: CancellationToken::new(),
            },
            rx,
        )
    }

    /// Session this queue belongs to.
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Enqueues a message, waiting for room.
    ///
    /// Fails once the session is closed, including while blocked on a full
    /// queue.
    pub async fn send(&self, message: ServerMessage) -> Result<(), SessionClosed> {
        if self.closed.is_cancelled() {
            return Err(SessionClosed);
        }
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(SessionClosed),
            sent = self.tx.send(message) => sent.map_err(|_| SessionClosed),
        }
    }

    /// Enqueues a message without waiting.
    #[must_use]
    pub fn try_send(&self, message: ServerMessage) -> TryOutcome {
        if self.closed.is_cancelled() {
            return TryOutcome::Closed;
        }
        match self.tx.try_send(message) {
            Ok(()) => TryOutcome::Queued,
            Err(TrySendError::Full(_)) => TryOutcome::Full,
            Err(TrySendError::Closed(_)) => TryOutcome::Closed,
        }
    }

    /// Marks the queue closed. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) was called or the send loop is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Token cancelled when the queue is closed.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}
