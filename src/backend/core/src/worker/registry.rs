//! Worker registry with heartbeat tracking and a dead-worker sweeper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::selector::{LeastLoadSelector, RoundRobinSelector, WorkerSelector};
use super::WorkerInfo;

/// Sweeper sleep slice; keeps shutdown latency bounded.
const SWEEP_SLICE: Duration = Duration::from_millis(200);

struct SweeperState {
    handle: Option<JoinHandle<()>>,
}

/// Map of worker id to [`WorkerInfo`] behind one mutex, plus the selection
/// strategy and the background sweeper.
pub struct WorkerRegistry {
    workers: Mutex<HashMap<String, WorkerInfo>>,
    selector: Box<dyn WorkerSelector>,
    wake: Notify,
    stopping: std::sync::atomic::AtomicBool,
    sweeper: Mutex<SweeperState>,
}

impl WorkerRegistry {
    /// `strategy` is `least-load` or `rr`; unknown values fall back to
    /// least-load with a warning.
    pub fn new(strategy: &str) -> Self {
        let normalized = strategy.trim().to_ascii_lowercase();
        let selector: Box<dyn WorkerSelector> = match normalized.as_str() {
            "rr" | "round-robin" | "round_robin" => Box::new(RoundRobinSelector::new()),
            "least-load" | "least_load" | "" => Box::new(LeastLoadSelector),
            other => {
                warn!(strategy = other, "unknown worker select strategy, falling back to least-load");
                Box::new(LeastLoadSelector)
            }
        };
        info!(strategy = selector.name(), "worker selector configured");
        Self {
            workers: Mutex::new(HashMap::new()),
            selector,
            wake: Notify::new(),
            stopping: std::sync::atomic::AtomicBool::new(false),
            sweeper: Mutex::new(SweeperState { handle: None }),
        }
    }

    /// Insert or replace a worker. Registration counts as a heartbeat.
    pub fn upsert(&self, mut info: WorkerInfo) {
        info.last_heartbeat = Instant::now();
        self.workers.lock().insert(info.id.clone(), info);
        self.wake.notify_waiters();
    }

    pub fn remove(&self, id: &str) {
        self.workers.lock().remove(id);
    }

    pub fn list(&self) -> Vec<WorkerInfo> {
        self.workers.lock().values().cloned().collect()
    }

    /// Refresh a worker's heartbeat and load. Returns false when the
    /// worker is unknown (the caller should re-register).
    pub fn touch_heartbeat(&self, id: &str, running_tasks: u32) -> bool {
        let mut workers = self.workers.lock();
        match workers.get_mut(id) {
            Some(w) => {
                w.last_heartbeat = Instant::now();
                w.running_tasks = running_tasks;
                true
            }
            None => false,
        }
    }

    pub fn pick_for_queue(&self, queue: &str, exclude_id: Option<&str>) -> Option<WorkerInfo> {
        let workers = self.workers.lock();
        self.selector.pick(&workers, queue, exclude_id)
    }

    pub fn mark_dispatch_failure(&self, id: &str, cooldown: Duration) {
        let mut workers = self.workers.lock();
        if let Some(w) = workers.get_mut(id) {
            w.dispatch_cooldown_until = Some(Instant::now() + cooldown);
        }
    }

    /// Remove workers that have been dead for longer than `prune_after`.
    pub fn prune_dead(&self, prune_after: Duration) {
        let mut workers = self.workers.lock();
        workers.retain(|id, w| {
            if w.is_alive() {
                return true;
            }
            let dead_for = w.last_heartbeat.elapsed();
            if dead_for > prune_after {
                debug!(worker = %id, dead_for_ms = dead_for.as_millis() as u64, "removing dead worker");
                false
            } else {
                true
            }
        });
    }

    /// Start the background sweeper loop. Idles on the wake signal while
    /// the worker set is empty.
    pub fn start_sweeper(self: &Arc<Self>, sweep_interval: Duration, prune_after: Duration) {
        let mut state = self.sweeper.lock();
        if state.handle.is_some() {
            return;
        }
        let registry = Arc::clone(self);
        state.handle = Some(tokio::spawn(async move {
            loop {
                if registry.stopping.load(std::sync::atomic::Ordering::Acquire) {
                    break;
                }
                if registry.workers.lock().is_empty() {
                    let notified = registry.wake.notified();
                    if registry.workers.lock().is_empty()
                        && !registry.stopping.load(std::sync::atomic::Ordering::Acquire)
                    {
                        notified.await;
                    }
                    continue;
                }

                registry.prune_dead(prune_after);

                let mut slept = Duration::ZERO;
                while slept < sweep_interval {
                    if registry.stopping.load(std::sync::atomic::Ordering::Acquire) {
                        return;
                    }
                    let step = (sweep_interval - slept).min(SWEEP_SLICE);
                    tokio::time::sleep(step).await;
                    slept += step;
                }
            }
        }));
    }

    pub async fn stop_sweeper(&self) {
        self.stopping.store(true, std::sync::atomic::Ordering::Release);
        self.wake.notify_waiters();
        let handle = self.sweeper.lock().handle.take();
        if let Some(h) = handle {
            let _ = h.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_counts_as_heartbeat_and_touch_updates_load() {
        let reg = WorkerRegistry::new("least-load");
        let mut w = WorkerInfo::new("w1", "127.0.0.1", 9001);
        w.max_running_tasks = 4;
        reg.upsert(w);

        assert!(reg.touch_heartbeat("w1", 3));
        assert_eq!(reg.list()[0].running_tasks, 3);
        assert!(!reg.touch_heartbeat("ghost", 0));
    }

    #[test]
    fn cooldown_set_by_dispatch_failure() {
        let reg = WorkerRegistry::new("least-load");
        reg.upsert(WorkerInfo::new("w1", "h", 1));
        reg.mark_dispatch_failure("w1", Duration::from_secs(30));
        assert!(reg.list()[0].is_cooling_down());
    }

    #[test]
    fn prune_only_removes_long_dead_workers() {
        let reg = WorkerRegistry::new("least-load");
        let mut dead = WorkerInfo::new("dead", "h", 1);
        dead.last_heartbeat = Instant::now() - Duration::from_secs(120);
        reg.workers.lock().insert(dead.id.clone(), dead);

        let mut fresh_dead = WorkerInfo::new("fresh", "h", 1);
        fresh_dead.last_heartbeat = Instant::now() - Duration::from_secs(15);
        reg.workers.lock().insert(fresh_dead.id.clone(), fresh_dead);

        reg.prune_dead(Duration::from_secs(60));
        let ids: Vec<String> = reg.list().into_iter().map(|w| w.id).collect();
        assert_eq!(ids, vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn sweeper_stops_promptly() {
        let reg = Arc::new(WorkerRegistry::new("least-load"));
        reg.start_sweeper(Duration::from_secs(5), Duration::from_secs(60));
        tokio::time::timeout(Duration::from_secs(2), reg.stop_sweeper()).await.unwrap();
    }
}
