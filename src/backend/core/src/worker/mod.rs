//! Remote worker membership, health, and selection.

mod heartbeat;
mod registry;
mod selector;

pub use heartbeat::{HeartbeatClient, HeartbeatSettings};
pub use registry::WorkerRegistry;
pub use selector::{LeastLoadSelector, RoundRobinSelector, WorkerSelector};

use std::time::{Duration, Instant};

use serde_json::{json, Value};

/// Liveness window: a worker with no heartbeat for this long is dead.
pub const ALIVE_WINDOW: Duration = Duration::from_secs(10);

/// Everything the master knows about one remote worker.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub queues: Vec<String>,
    pub labels: Vec<String>,
    pub running_tasks: u32,
    pub max_running_tasks: u32,
    pub last_heartbeat: Instant,
    pub dispatch_cooldown_until: Option<Instant>,
}

impl WorkerInfo {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            queues: Vec::new(),
            labels: Vec::new(),
            running_tasks: 0,
            max_running_tasks: 1,
            last_heartbeat: Instant::now(),
            dispatch_cooldown_until: None,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.last_heartbeat.elapsed() < ALIVE_WINDOW
    }

    pub fn is_full(&self) -> bool {
        self.running_tasks >= self.max_running_tasks
    }

    pub fn is_cooling_down(&self) -> bool {
        matches!(self.dispatch_cooldown_until, Some(until) if Instant::now() < until)
    }

    /// A worker serves `queue` when it lists it explicitly, or when it
    /// lists nothing and the queue is `default` (or unspecified).
    pub fn serves_queue(&self, queue: &str) -> bool {
        if queue.is_empty() {
            return true;
        }
        if self.queues.is_empty() {
            return queue == "default";
        }
        self.queues.iter().any(|q| q == queue)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "host": self.host,
            "port": self.port,
            "queues": self.queues,
            "labels": self.labels,
            "running_tasks": self.running_tasks,
            "max_running_tasks": self.max_running_tasks,
            "alive": self.is_alive(),
            "last_seen_ms_ago": self.last_heartbeat.elapsed().as_millis() as i64,
        })
    }
}
