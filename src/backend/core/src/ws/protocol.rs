//! WebSocket wire protocol.
//!
//! Handshake: the first client message must carry a token, e.g.
//! `{"token":"..."}`; the server replies `{"type":"authed"}`. Subsequent
//! commands:
//!   `{"op":"subscribe"|"unsubscribe","topic":"task_logs"|"task_events","task_id":"t1","run_id":"r1?"}`
//!   `{"op":"ping"}` -> `{"type":"pong"}`
//! Channel names:
//!   task_logs   -> `task.logs.<task_id>[.<run_id>]`
//!   task_events -> `task.events.<task_id>[.<run_id>]`
//! Server pushes log records as `{"type":"log",...}` and task events as
//! `{"type":"event",...}`; global broadcasts carry `{event, data}` and
//! bypass subscriptions.

use chrono::Utc;
use serde_json::{json, Value};

use crate::logging::LogRecord;

/// Client command verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsOp {
    Subscribe,
    Unsubscribe,
    Ping,
    Unknown,
}

/// Subscription topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsTopic {
    TaskLogs,
    TaskEvents,
    Unknown,
}

/// Parsed client message.
#[derive(Debug, Clone)]
pub struct ClientCommand {
    pub op: WsOp,
    pub topic: WsTopic,
    pub task_id: String,
    pub run_id: String,
    pub token: Option<String>,
}

pub fn parse_client_command(j: &Value) -> ClientCommand {
    let op = match j.get("op").and_then(Value::as_str) {
        Some("subscribe") => WsOp::Subscribe,
        Some("unsubscribe") => WsOp::Unsubscribe,
        Some("ping") => WsOp::Ping,
        Some(_) => WsOp::Unknown,
        None => WsOp::Unknown,
    };
    let topic = match j.get("topic").and_then(Value::as_str) {
        Some("task_logs") => WsTopic::TaskLogs,
        Some("task_events") => WsTopic::TaskEvents,
        _ => WsTopic::Unknown,
    };
    ClientCommand {
        op,
        topic,
        task_id: j.get("task_id").and_then(Value::as_str).unwrap_or_default().to_string(),
        run_id: j.get("run_id").and_then(Value::as_str).unwrap_or_default().to_string(),
        token: j.get("token").and_then(Value::as_str).map(str::to_string),
    }
}

pub fn channel_task_logs(task_id: &str, run_id: &str) -> String {
    if run_id.is_empty() {
        format!("task.logs.{task_id}")
    } else {
        format!("task.logs.{task_id}.{run_id}")
    }
}

pub fn channel_task_events(task_id: &str, run_id: &str) -> String {
    if run_id.is_empty() {
        format!("task.events.{task_id}")
    } else {
        format!("task.events.{task_id}.{run_id}")
    }
}

/// Build the `{"type":"log",...}` push payload for a record.
pub fn build_log_json(r: &LogRecord) -> Value {
    let mut j = json!({
        "type": "log",
        "task_id": r.task_id.value,
        "seq": r.seq,
        "ts_ms": Utc::now().timestamp_millis(),
        "level": r.level as i32,
        "stream": r.stream as i32,
        "message": r.message,
        "duration_ms": r.duration_ms,
        "attempt": r.attempt,
        "fields": r.fields,
    });
    if !r.task_id.run_id.is_empty() {
        j["run_id"] = Value::String(r.task_id.run_id.clone());
    }
    j
}

/// Build the `{"type":"event",...}` push payload for a task/DAG event.
pub fn build_event_json(task_id: &str, event: &str, extra: Value, run_id: &str) -> Value {
    let mut j = json!({
        "type": "event",
        "task_id": task_id,
        "event": event,
        "ts_ms": Utc::now().timestamp_millis(),
        "extra": extra,
    });
    if !run_id.is_empty() {
        j["run_id"] = Value::String(run_id.to_string());
    }
    j
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names() {
        assert_eq!(channel_task_logs("t1", ""), "task.logs.t1");
        assert_eq!(channel_task_logs("t1", "r1"), "task.logs.t1.r1");
        assert_eq!(channel_task_events("t1", "r1"), "task.events.t1.r1");
    }

    #[test]
    fn parses_subscribe() {
        let cmd = parse_client_command(&json!({
            "op": "subscribe", "topic": "task_logs", "task_id": "t1", "run_id": "r1"
        }));
        assert_eq!(cmd.op, WsOp::Subscribe);
        assert_eq!(cmd.topic, WsTopic::TaskLogs);
        assert_eq!(cmd.task_id, "t1");
        assert_eq!(cmd.run_id, "r1");
    }

    #[test]
    fn token_only_message_is_unknown_op_with_token() {
        let cmd = parse_client_command(&json!({"token": "abc"}));
        assert_eq!(cmd.op, WsOp::Unknown);
        assert_eq!(cmd.token.as_deref(), Some("abc"));
    }

    #[test]
    fn event_json_shape() {
        let j = build_event_json("t1", "task_start", json!({"queue": "io"}), "r1");
        assert_eq!(j["type"], "event");
        assert_eq!(j["event"], "task_start");
        assert_eq!(j["run_id"], "r1");
        assert_eq!(j["extra"]["queue"], "io");
    }
}
