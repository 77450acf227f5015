//! Fan-out of task log records: ring buffer, sinks, and live observers.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;

use super::{LogLevel, LogQueryResult, LogRecord, LogSink, TaskLogBuffer};
use crate::task::TaskId;

/// Receives every record after its `seq` is assigned. The WebSocket
/// streamer is the production implementation.
pub trait LogObserver: Send + Sync {
    fn on_record(&self, rec: &LogRecord);
}

/// Owns the per-task ring buffers and distributes each record to the
/// configured sinks and observers.
pub struct LogManager {
    buffer: TaskLogBuffer,
    sinks: RwLock<Vec<Arc<dyn LogSink>>>,
    observers: RwLock<Vec<Arc<dyn LogObserver>>>,
}

impl LogManager {
    pub fn new(per_task_max_records: usize) -> Self {
        Self {
            buffer: TaskLogBuffer::new(per_task_max_records),
            sinks: RwLock::new(Vec::new()),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn add_sink(&self, sink: Arc<dyn LogSink>) {
        self.sinks.write().push(sink);
    }

    pub fn add_observer(&self, observer: Arc<dyn LogObserver>) {
        self.observers.write().push(observer);
    }

    /// Buffer the record (assigning its sequence number), then fan it out.
    /// Returns the stored copy carrying the assigned `seq`.
    pub fn emit(&self, mut rec: LogRecord) -> LogRecord {
        if rec.ts.is_none() {
            rec.ts = Some(Utc::now());
        }
        let stored = self.buffer.append(&rec);

        for sink in self.sinks.read().iter() {
            sink.consume(&stored);
        }
        for observer in self.observers.read().iter() {
            observer.on_record(&stored);
        }
        stored
    }

    /// Convenience wrapper for event-stream records.
    pub fn emit_event(&self, task_id: &TaskId, level: LogLevel, message: impl Into<String>) -> LogRecord {
        let mut rec = LogRecord::event(task_id.clone(), level, message);
        rec.dag_run_id = task_id.run_id.clone();
        self.emit(rec)
    }

    pub fn query(&self, task_id: &TaskId, from: u64, limit: usize) -> LogQueryResult {
        self.buffer.query(task_id, from, limit)
    }

    pub fn tail(&self, task_id: &TaskId, n: usize) -> Vec<LogRecord> {
        self.buffer.tail(task_id, n)
    }

    pub fn prune_older_than(&self, max_age: Duration) {
        self.buffer.prune_older_than(max_age)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Capture(Mutex<Vec<u64>>);

    impl LogObserver for Capture {
        fn on_record(&self, rec: &LogRecord) {
            self.0.lock().push(rec.seq);
        }
    }

    #[test]
    fn emit_assigns_seq_then_notifies_observers() {
        let mgr = LogManager::new(10);
        let cap = Arc::new(Capture(Mutex::new(Vec::new())));
        mgr.add_observer(cap.clone());

        let id = TaskId::new("t");
        mgr.emit_event(&id, LogLevel::Info, "one");
        mgr.emit_event(&id, LogLevel::Info, "two");

        assert_eq!(*cap.0.lock(), vec![1, 2]);
        assert_eq!(mgr.query(&id, 1, 10).records.len(), 2);
    }
}
