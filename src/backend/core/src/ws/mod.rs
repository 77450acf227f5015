//! WebSocket fan-out: hub, per-session subscription state, wire protocol,
//! and the log/event streamer feeding it.

mod hub;
mod protocol;
mod session;
mod streamer;

pub use hub::WsHub;
pub use protocol::{
    build_event_json, build_log_json, channel_task_events, channel_task_logs, parse_client_command, ClientCommand,
    WsOp, WsTopic,
};
pub use session::{WsSession, MAX_PENDING_MESSAGES};
pub use streamer::WsLogStreamer;
