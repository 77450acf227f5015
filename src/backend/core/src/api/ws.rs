//! WebSocket endpoint: authentication handshake, subscription commands,
//! and the serialized write loop.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tracing::debug;

use super::AppState;
use crate::ws::{channel_task_events, channel_task_logs, parse_client_command, WsOp, WsSession, WsTopic};

pub async fn ws_handler(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (session, mut outbound) = WsSession::new();
    state.hub.add_session(&session);

    // Serialized writer: the only task touching the sink, so per-session
    // delivery order is enqueue order.
    let writer_session = session.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = outbound.recv() => {
                    match msg {
                        Some(text) => {
                            if sink.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = writer_session.closed_signal() => break,
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        let Ok(frame) = frame else {
            break;
        };
        if session.is_closed() {
            break;
        }

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(body) = serde_json::from_str::<Value>(&text) else {
            session.send(json!({"type": "error", "message": "invalid json"}).to_string());
            continue;
        };
        let cmd = parse_client_command(&body);

        // First message must authenticate. A token may ride along with an
        // op, in which case the op is handled in the same round.
        if !session.is_authed() {
            let valid = cmd.token.as_deref().map(|t| state.auth.validate(t).is_some()).unwrap_or(false);
            if !valid {
                session.send(json!({"type": "error", "message": "auth required"}).to_string());
                session.close("unauthenticated");
                break;
            }
            session.mark_authed();
            session.send(json!({"type": "authed"}).to_string());
            if cmd.op == WsOp::Unknown {
                continue;
            }
        }

        match cmd.op {
            WsOp::Ping => session.send(json!({"type": "pong"}).to_string()),
            WsOp::Subscribe | WsOp::Unsubscribe => {
                if cmd.task_id.is_empty() {
                    session.send(json!({"type": "error", "message": "task_id required"}).to_string());
                    continue;
                }
                let channel = match cmd.topic {
                    WsTopic::TaskLogs => channel_task_logs(&cmd.task_id, &cmd.run_id),
                    WsTopic::TaskEvents => channel_task_events(&cmd.task_id, &cmd.run_id),
                    WsTopic::Unknown => {
                        session.send(json!({"type": "error", "message": "unknown topic"}).to_string());
                        continue;
                    }
                };
                if cmd.op == WsOp::Subscribe {
                    session.subscribe(channel);
                } else {
                    session.unsubscribe(&channel);
                }
            }
            WsOp::Unknown => {
                session.send(json!({"type": "error", "message": "unknown op"}).to_string());
            }
        }
    }

    session.close("disconnected");
    state.hub.remove_session(&session);
    let _ = writer.await;
    debug!(session = %session.id(), "ws session ended");
}
