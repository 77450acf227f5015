//! Structured task log pipeline.
//!
//! Three tiers: per-task ring buffers for paging clients, a sink fan-out
//! (console + rotating file), and WebSocket streaming. Operator logs go
//! through `tracing`; this module is the *task* log path that clients page
//! and subscribe to.

mod buffer;
mod formatter;
mod manager;
mod rotation;
mod sink;

pub use buffer::{LogQueryResult, TaskLogBuffer};
pub use formatter::format_line;
pub use manager::{LogManager, LogObserver};
pub use rotation::{LogRotation, RotationPolicy};
pub use sink::{ConsoleSink, FileSink, FileSinkOptions, LogSink};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::TaskId;

/// Log severity. The numeric values are part of the WS wire format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum LogLevel {
    Debug = 0,
    #[default]
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Which stream a record belongs to. Numeric values are wire format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum LogStream {
    None = 0,
    Stdout = 1,
    Stderr = 2,
    /// Status/event records (start/end/retry/timeout...).
    #[default]
    Event = 3,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::None => "None",
            LogStream::Stdout => "STDOUT",
            LogStream::Stderr => "STDERR",
            LogStream::Event => "EVENT",
        }
    }
}

/// One structured task log record.
///
/// `seq` is assigned monotonically per task by the buffer; clients page by
/// `(task_id, from_seq)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogRecord {
    pub task_id: TaskId,
    pub dag_run_id: String,
    pub cron_job_id: String,
    pub worker_id: String,

    pub level: LogLevel,
    pub stream: LogStream,
    pub message: String,

    pub ts: Option<DateTime<Utc>>,
    pub duration_ms: i64,
    pub attempt: u32,

    pub fields: HashMap<String, String>,

    pub seq: u64,
}

impl LogRecord {
    pub fn event(task_id: TaskId, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            task_id,
            level,
            stream: LogStream::Event,
            message: message.into(),
            ts: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn ts_ms(&self) -> i64 {
        self.ts.map(|t| t.timestamp_millis()).unwrap_or_default()
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}
