//! Per-task ring buffers with monotonically increasing sequence numbers.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::LogRecord;
use crate::task::TaskId;

/// Result of a paged query: records plus the `from` to use for the next
/// page.
#[derive(Debug, Default, Clone)]
pub struct LogQueryResult {
    pub records: Vec<LogRecord>,
    pub next_from: u64,
}

struct PerTaskBuf {
    q: VecDeque<LogRecord>,
    next_seq: u64,
    last_touch: Instant,
}

impl PerTaskBuf {
    fn new() -> Self {
        Self { q: VecDeque::new(), next_seq: 1, last_touch: Instant::now() }
    }
}

/// Map of `(task_id.value, run_id)` to a bounded deque of records.
///
/// `append` assigns `seq = next_seq++` and evicts from the head once the
/// buffer exceeds `per_task_max_records`. Early sequence numbers may be
/// lost to eviction, so queries scan for the first record with
/// `seq >= from`.
pub struct TaskLogBuffer {
    bufs: Mutex<HashMap<(String, String), PerTaskBuf>>,
    per_task_max_records: usize,
}

impl TaskLogBuffer {
    pub fn new(per_task_max_records: usize) -> Self {
        Self { bufs: Mutex::new(HashMap::new()), per_task_max_records: per_task_max_records.max(1) }
    }

    fn key(task_id: &TaskId) -> (String, String) {
        (task_id.value.clone(), task_id.run_id.clone())
    }

    /// Append a record, returning the stored copy with its assigned `seq`.
    pub fn append(&self, rec: &LogRecord) -> LogRecord {
        let mut bufs = self.bufs.lock();
        let b = bufs.entry(Self::key(&rec.task_id)).or_insert_with(PerTaskBuf::new);
        b.last_touch = Instant::now();

        let mut stored = rec.clone();
        stored.seq = b.next_seq;
        b.next_seq += 1;
        b.q.push_back(stored.clone());

        while b.q.len() > self.per_task_max_records {
            b.q.pop_front();
        }
        stored
    }

    /// Page records with `seq >= from`, up to `limit`.
    pub fn query(&self, task_id: &TaskId, from: u64, limit: usize) -> LogQueryResult {
        let mut out = LogQueryResult { next_from: from, ..Default::default() };
        let mut bufs = self.bufs.lock();
        let Some(b) = bufs.get_mut(&Self::key(task_id)) else {
            return out;
        };
        b.last_touch = Instant::now();

        for rec in &b.q {
            if rec.seq >= from {
                out.records.push(rec.clone());
                if out.records.len() >= limit {
                    break;
                }
            }
        }
        if let Some(last) = out.records.last() {
            out.next_from = last.seq + 1;
        }
        out
    }

    /// Last `n` records for a task.
    pub fn tail(&self, task_id: &TaskId, n: usize) -> Vec<LogRecord> {
        let bufs = self.bufs.lock();
        let Some(b) = bufs.get(&Self::key(task_id)) else {
            return Vec::new();
        };
        let start = b.q.len().saturating_sub(n);
        b.q.iter().skip(start).cloned().collect()
    }

    pub fn clear(&self, task_id: &TaskId) {
        self.bufs.lock().remove(&Self::key(task_id));
    }

    /// Drop buffers untouched for longer than `max_age`.
    pub fn prune_older_than(&self, max_age: Duration) {
        let now = Instant::now();
        self.bufs.lock().retain(|_, b| now.duration_since(b.last_touch) <= max_age);
    }

    pub fn task_count(&self) -> usize {
        self.bufs.lock().len()
    }
}
