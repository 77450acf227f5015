//! Per-connection session state: subscriptions plus a serialized outbound
//! queue with backpressure.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

/// Outbound queue bound; a session exceeding it is closed with reason
/// `backpressure`.
pub const MAX_PENDING_MESSAGES: usize = 512;

/// One WebSocket session. Writes are serialized by a single writer task
/// draining `rx`, so handlers never race on the underlying stream.
pub struct WsSession {
    id: Uuid,
    authed: AtomicBool,
    closed: AtomicBool,
    close_signal: Notify,
    subscriptions: Mutex<HashSet<String>>,
    tx: mpsc::Sender<String>,
}

impl WsSession {
    /// Create the session and hand back the receiving end for the writer
    /// task.
    pub fn new() -> (std::sync::Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(MAX_PENDING_MESSAGES);
        let session = std::sync::Arc::new(Self {
            id: Uuid::new_v4(),
            authed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
            subscriptions: Mutex::new(HashSet::new()),
            tx,
        });
        (session, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_authed(&self) -> bool {
        self.authed.load(Ordering::Acquire)
    }

    pub fn mark_authed(&self) {
        self.authed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Ask the writer task to drop the connection.
    pub fn close(&self, reason: &str) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            warn!(session = %self.id, reason, "closing ws session");
            self.close_signal.notify_waiters();
        }
    }

    /// Awaited by the writer task; resolves once `close` is called.
    pub async fn closed_signal(&self) {
        if self.is_closed() {
            return;
        }
        self.close_signal.notified().await;
    }

    pub fn subscribe(&self, channel: String) {
        self.subscriptions.lock().insert(channel);
    }

    pub fn unsubscribe(&self, channel: &str) {
        self.subscriptions.lock().remove(channel);
    }

    pub fn subscribed(&self, channel: &str) -> bool {
        self.subscriptions.lock().contains(channel)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().iter().cloned().collect()
    }

    /// Enqueue an outbound text frame. A full queue closes the session.
    pub fn send(&self, text: String) {
        if self.is_closed() {
            return;
        }
        match self.tx.try_send(text) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => self.close("backpressure"),
            Err(mpsc::error::TrySendError::Closed(_)) => self.closed.store(true, Ordering::Release),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscription_set_round_trip() {
        let (session, _rx) = WsSession::new();
        session.subscribe("task.logs.a".into());
        assert!(session.subscribed("task.logs.a"));
        session.unsubscribe("task.logs.a");
        assert!(!session.subscribed("task.logs.a"));
    }

    #[tokio::test]
    async fn backpressure_closes_session() {
        let (session, _rx) = WsSession::new();
        for i in 0..(MAX_PENDING_MESSAGES + 1) {
            session.send(format!("m{i}"));
        }
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn frames_drain_in_order() {
        let (session, mut rx) = WsSession::new();
        session.send("a".into());
        session.send("b".into());
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));
    }
}
