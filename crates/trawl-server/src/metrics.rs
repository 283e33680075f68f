//! Gateway counters.
//!
//! [`GatewayMetrics`] holds lock-free atomic counters updated on the hot
//! path by sessions, request handlers and the hub. A
//! [`MetricsSnapshot`] is what `GET /api/v1/stats` serves.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters for gateway statistics.
///
/// All counters use `Relaxed` ordering. Snapshots are consistent enough
/// for monitoring, not for accounting.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// Sessions accepted since start.
    pub sessions_opened: AtomicU64,
    /// Sessions torn down since start.
    pub sessions_closed: AtomicU64,
    /// Inbound data frames.
    pub frames_received: AtomicU64,
    /// Inbound frames that failed to decode.
    pub decode_errors: AtomicU64,
    /// Messages written to clients.
    pub messages_sent: AtomicU64,
    /// Serialized bytes written to clients.
    pub bytes_sent: AtomicU64,
    /// Requests dispatched to a handler.
    pub requests_started: AtomicU64,
    /// Cancel requests that hit an outstanding request.
    pub requests_canceled: AtomicU64,
    /// Broadcast messages dropped because a session queue was full.
    pub broadcast_dropped: AtomicU64,
    /// Control replies dropped because a session queue was full.
    pub replies_dropped: AtomicU64,
    /// Documents accepted through `/submit`.
    pub documents_submitted: AtomicU64,
}

impl GatewayMetrics {
    /// Creates a metrics instance with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new session.
    pub fn record_session_open(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a session teardown.
    pub fn record_session_close(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an inbound frame.
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a frame that could not be decoded.
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a written message of `bytes` serialized bytes.
    pub fn record_send(&self, bytes: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a dispatched request.
    pub fn record_request(&self) {
        self.requests_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful cancel.
    pub fn record_cancel(&self) {
        self.requests_canceled.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a broadcast dropped for one session.
    pub fn record_broadcast_drop(&self) {
        self.broadcast_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a control reply dropped for one session.
    pub fn record_reply_drop(&self) {
        self.replies_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a document pushed through `/submit`.
    pub fn record_submit(&self) {
        self.documents_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Sessions currently open according to the counters.
    #[must_use]
    pub fn active_sessions(&self) -> u64 {
        self.sessions_opened
            .load(Ordering::Relaxed)
            .saturating_sub(self.sessions_closed.load(Ordering::Relaxed))
    }

    /// Point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            requests_started: self.requests_started.load(Ordering::Relaxed),
            requests_canceled: self.requests_canceled.load(Ordering::Relaxed),
            broadcast_dropped: self.broadcast_dropped.load(Ordering::Relaxed),
            replies_dropped: self.replies_dropped.load(Ordering::Relaxed),
            documents_submitted: self.documents_submitted.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`GatewayMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Sessions accepted since start.
    pub sessions_opened: u64,
    /// Sessions torn down since start.
    pub sessions_closed: u64,
    /// Inbound data frames.
    pub frames_received: u64,
    /// Inbound frames that failed to decode.
    pub decode_errors: u64,
    /// Messages written to clients.
    pub messages_sent: u64,
    /// Serialized bytes written to clients.
    pub bytes_sent: u64,
    /// Requests dispatched to a handler.
    pub requests_started: u64,
    /// Cancel requests that hit an outstanding request.
    pub requests_canceled: u64,
    /// Broadcast messages dropped on full session queues.
    pub broadcast_dropped: u64,
    /// Control replies dropped on full session queues.
    pub replies_dropped: u64,
    /// Documents accepted through `/submit`.
    pub documents_submitted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_zeros() {
        assert_eq!(GatewayMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_record_send() {
        let m = GatewayMetrics::new();
        m.record_send(512);
        m.record_send(1024);

        let s = m.snapshot();
        assert_eq!(s.messages_sent, 2);
        assert_eq!(s.bytes_sent, 1536);
    }

    #[test]
    fn test_active_sessions_saturates() {
        let m = GatewayMetrics::new();
        m.record_session_close();
        assert_eq!(m.active_sessions(), 0);

        m.record_session_open();
        m.record_session_open();
        m.record_session_open();
        assert_eq!(m.active_sessions(), 2);
    }

    #[test]
    fn test_combined_operations() {
        let m = GatewayMetrics::new();
        m.record_frame();
        m.record_frame();
        m.record_decode_error();
        m.record_request();
        m.record_cancel();
        m.record_broadcast_drop();
        m.record_reply_drop();
        m.record_submit();

        let s = m.snapshot();
        assert_eq!(s.frames_received, 2);
        assert_eq!(s.decode_errors, 1);
        assert_eq!(s.requests_started, 1);
        assert_eq!(s.requests_canceled, 1);
        assert_eq!(s.broadcast_dropped, 1);
        assert_eq!(s.replies_dropped, 1);
        assert_eq!(s.documents_submitted, 1);

        let json = serde_json::to_value(s).unwrap();
        assert_eq!(json["frames_received"], 2);
    }
}
