//! Session registry and channel fan-out.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::session::WsSession;

/// Holds weak references to live sessions; dead references are pruned on
/// every walk so a dropped connection needs no explicit removal.
pub struct WsHub {
    sessions: Mutex<Vec<Weak<WsSession>>>,
}

impl WsHub {
    pub fn new() -> Self {
        Self { sessions: Mutex::new(Vec::new()) }
    }

    pub fn add_session(&self, session: &Arc<WsSession>) {
        let mut sessions = self.sessions.lock();
        sessions.push(Arc::downgrade(session));
        debug!(count = sessions.len(), "ws session added");
    }

    pub fn remove_session(&self, session: &Arc<WsSession>) {
        let mut sessions = self.sessions.lock();
        sessions.retain(|weak| match weak.upgrade() {
            Some(s) => !Arc::ptr_eq(&s, session),
            None => false,
        });
        debug!(count = sessions.len(), "ws session removed");
    }

    /// Deliver to every authed session subscribed to `channel`.
    pub fn broadcast(&self, channel: &str, text: &str) {
        let mut sessions = self.sessions.lock();
        sessions.retain(|weak| {
            let Some(s) = weak.upgrade() else {
                return false;
            };
            if s.is_authed() && s.subscribed(channel) {
                s.send(text.to_string());
            }
            true
        });
    }

    /// Deliver to every authed session, subscriptions ignored.
    pub fn broadcast_all(&self, text: &str) {
        let mut sessions = self.sessions.lock();
        sessions.retain(|weak| {
            let Some(s) = weak.upgrade() else {
                return false;
            };
            if s.is_authed() {
                s.send(text.to_string());
            }
            true
        });
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().iter().filter(|w| w.upgrade().is_some()).count()
    }
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_only_subscribers() {
        let hub = WsHub::new();
        let (sub, mut sub_rx) = WsSession::new();
        let (other, mut other_rx) = WsSession::new();
        sub.mark_authed();
        other.mark_authed();
        hub.add_session(&sub);
        hub.add_session(&other);

        sub.subscribe("task.logs.a".into());
        hub.broadcast("task.logs.a", "hello");

        assert_eq!(sub_rx.try_recv().ok().as_deref(), Some("hello"));
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_sessions_pruned_on_walk() {
        let hub = WsHub::new();
        {
            let (s, _rx) = WsSession::new();
            hub.add_session(&s);
            assert_eq!(hub.session_count(), 1);
        }
        hub.broadcast_all("x");
        assert_eq!(hub.session_count(), 0);
    }

    #[tokio::test]
    async fn unauthed_sessions_receive_nothing() {
        let hub = WsHub::new();
        let (s, mut rx) = WsSession::new();
        hub.add_session(&s);
        s.subscribe("task.logs.a".into());
        hub.broadcast("task.logs.a", "hi");
        assert!(rx.try_recv().is_err());
    }
}
