//! Bridges the log pipeline and engine events onto WebSocket channels.

use std::sync::Arc;

use serde_json::{json, Value};

use super::hub::WsHub;
use super::protocol::{build_event_json, build_log_json, channel_task_events, channel_task_logs};
use crate::logging::{LogObserver, LogRecord};

/// Streams log records and task/DAG lifecycle events to subscribed
/// sessions.
pub struct WsLogStreamer {
    hub: Arc<WsHub>,
}

impl WsLogStreamer {
    pub fn new(hub: Arc<WsHub>) -> Self {
        Self { hub }
    }

    /// Broadcast a record on `task.logs.<id>` and, when a run id is
    /// present, on the run-scoped channel too.
    pub fn push_record(&self, rec: &LogRecord) {
        let text = build_log_json(rec).to_string();
        self.hub.broadcast(&channel_task_logs(&rec.task_id.value, ""), &text);
        if !rec.task_id.run_id.is_empty() {
            self.hub.broadcast(&channel_task_logs(&rec.task_id.value, &rec.task_id.run_id), &text);
        }
    }

    /// Broadcast an explicit task/DAG event on `task.events.<id>[.<run>]`.
    pub fn push_task_event(&self, task_id: &str, event: &str, extra: Value, run_id: &str) {
        let text = build_event_json(task_id, event, extra, run_id).to_string();
        self.hub.broadcast(&channel_task_events(task_id, ""), &text);
        if !run_id.is_empty() {
            self.hub.broadcast(&channel_task_events(task_id, run_id), &text);
        }
    }

    /// Subscription-free broadcast envelope for task lifecycle changes.
    pub fn broadcast_envelope(&self, event: &str, data: Value) {
        let text = json!({ "event": event, "data": data }).to_string();
        self.hub.broadcast_all(&text);
    }
}

impl LogObserver for WsLogStreamer {
    fn on_record(&self, rec: &LogRecord) {
        self.push_record(rec);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, LogRecord};
    use crate::task::TaskId;
    use crate::ws::WsSession;

    #[tokio::test]
    async fn record_fans_out_to_plain_and_run_channels() {
        let hub = Arc::new(WsHub::new());
        let streamer = WsLogStreamer::new(hub.clone());

        let (plain, mut plain_rx) = WsSession::new();
        plain.mark_authed();
        plain.subscribe("task.logs.t1".into());
        hub.add_session(&plain);

        let (scoped, mut scoped_rx) = WsSession::new();
        scoped.mark_authed();
        scoped.subscribe("task.logs.t1.r1".into());
        hub.add_session(&scoped);

        let mut rec = LogRecord::event(TaskId::with_run("t1", "r1"), LogLevel::Info, "hi");
        rec.seq = 3;
        streamer.push_record(&rec);

        let a: serde_json::Value = serde_json::from_str(&plain_rx.try_recv().unwrap()).unwrap();
        assert_eq!(a["type"], "log");
        assert_eq!(a["seq"], 3);
        let b: serde_json::Value = serde_json::from_str(&scoped_rx.try_recv().unwrap()).unwrap();
        assert_eq!(b["run_id"], "r1");
    }

    #[tokio::test]
    async fn task_event_reaches_event_channel() {
        let hub = Arc::new(WsHub::new());
        let streamer = WsLogStreamer::new(hub.clone());

        let (s, mut rx) = WsSession::new();
        s.mark_authed();
        s.subscribe("task.events.t1".into());
        hub.add_session(&s);

        streamer.push_task_event("t1", "dag_node_ready", json!({"indegree": 0}), "");
        let msg: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(msg["event"], "dag_node_ready");
    }
}
