//! Priority worker pool for DAG node execution.
//!
//! Workers are long-lived tokio tasks pulling the highest-priority job
//! from the shared [`PriorityQueue`]. Nested DAGs occupy a worker for the
//! duration of the child run, so the pool grows dynamically (hard-capped
//! at 4x the initial size) whenever queued jobs outnumber spare workers;
//! without that, a two-level DAG with `max_parallel` equal to the pool
//! size deadlocks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::queue::PriorityQueue;
use crate::task::TaskPriority;

type Job = BoxFuture<'static, ()>;

tokio::task_local! {
    static IS_DAG_WORKER: ();
}

struct PoolInner {
    queue: PriorityQueue<Job>,
    signal: Notify,
    total_workers: AtomicUsize,
    busy_workers: AtomicUsize,
    max_workers: AtomicUsize,
    /// Serializes growth decisions so concurrent callers cannot overshoot
    /// the cap.
    growth: Mutex<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// The shared DAG pool.
pub struct DagPool {
    inner: Arc<PoolInner>,
}

impl DagPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(PoolInner {
                queue: PriorityQueue::new(),
                signal: Notify::new(),
                total_workers: AtomicUsize::new(0),
                busy_workers: AtomicUsize::new(0),
                max_workers: AtomicUsize::new(0),
                growth: Mutex::new(()),
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// True when the current tokio task is one of this process's pool
    /// workers; the DAG executor uses this to execute nested submissions
    /// in place.
    pub fn is_dag_worker_task() -> bool {
        IS_DAG_WORKER.try_with(|_| ()).is_ok()
    }

    /// Start `num_workers` workers; the growth cap is four times that.
    pub fn start(&self, num_workers: usize) {
        let workers = num_workers.max(1);
        if self.inner.total_workers.load(Ordering::Acquire) > 0 {
            return;
        }
        self.inner.max_workers.store(workers * 4, Ordering::Release);
        for i in 0..workers {
            self.spawn_worker(i);
        }
        info!(workers, "dag pool started");
    }

    fn spawn_worker(&self, worker_id: usize) {
        let inner = Arc::clone(&self.inner);
        inner.total_workers.fetch_add(1, Ordering::AcqRel);
        let handle = tokio::spawn(async move {
            let inner2 = Arc::clone(&inner);
            IS_DAG_WORKER
                .scope((), async move {
                    let inner = inner2;
                    debug!(worker_id, "dag worker started");
                    loop {
                        if let Some(job) = inner.queue.pop() {
                            inner.busy_workers.fetch_add(1, Ordering::AcqRel);
                            job.await;
                            inner.busy_workers.fetch_sub(1, Ordering::AcqRel);
                            continue;
                        }
                        if inner.queue.is_shutdown() {
                            break;
                        }
                        let notified = inner.signal.notified();
                        if !inner.queue.is_empty() || inner.queue.is_shutdown() {
                            continue;
                        }
                        notified.await;
                    }
                    debug!(worker_id, "dag worker exiting");
                })
                .await;
            inner.total_workers.fetch_sub(1, Ordering::AcqRel);
        });
        self.inner.handles.lock().push(handle);
    }

    /// Queue a job at `priority` and wake one worker, growing the pool
    /// when saturated.
    pub fn post(&self, job: Job, priority: TaskPriority) {
        if !self.inner.queue.push(job, priority) {
            return;
        }
        self.maybe_spawn_worker();
        self.inner.signal.notify_one();
    }

    /// Grow the pool when queued jobs exceed the spare (idle) workers.
    /// Even idle-looking workers may be about to block on a nested DAG, so
    /// the check uses queue depth rather than pure idleness.
    pub fn maybe_spawn_worker(&self) {
        if self.inner.queue.is_shutdown() {
            return;
        }
        let _growth = self.inner.growth.lock();
        let total = self.inner.total_workers.load(Ordering::Acquire);
        let max = self.inner.max_workers.load(Ordering::Acquire);
        if total >= max {
            return;
        }
        let busy = self.inner.busy_workers.load(Ordering::Acquire);
        let spare = total.saturating_sub(busy);
        let queued = self.inner.queue.len();
        if queued > 0 && spare < queued {
            debug!(total, busy, queued, max, "dag pool dynamic spawn");
            self.spawn_worker(total);
            self.inner.signal.notify_one();
        }
    }

    pub fn worker_count(&self) -> usize {
        self.inner.total_workers.load(Ordering::Acquire)
    }

    /// Stop accepting work, drop queued jobs, and join every worker.
    pub async fn stop(&self) {
        if self.inner.queue.is_shutdown() {
            return;
        }
        self.inner.queue.shutdown();
        self.inner.signal.notify_waiters();

        let handles: Vec<JoinHandle<()>> = self.inner.handles.lock().drain(..).collect();
        for h in handles {
            let _ = h.await;
        }
        info!("dag pool stopped");
    }
}

impl Default for DagPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn executes_posted_jobs() {
        let pool = DagPool::new();
        pool.start(2);
        let (tx, mut rx) = mpsc::unbounded_channel();

        for i in 0..5 {
            let tx = tx.clone();
            pool.post(
                Box::pin(async move {
                    let _ = tx.send(i);
                }),
                TaskPriority::Normal,
            );
        }

        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap());
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        pool.stop().await;
    }

    #[tokio::test]
    async fn higher_priority_drains_first() {
        let pool = DagPool::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Queue before starting workers so ordering is deterministic.
        for (label, priority) in
            [("low", TaskPriority::Low), ("critical", TaskPriority::Critical), ("normal", TaskPriority::Normal)]
        {
            let tx = tx.clone();
            pool.post(
                Box::pin(async move {
                    let _ = tx.send(label);
                }),
                priority,
            );
        }
        pool.start(1);

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap());
        }
        assert_eq!(order, vec!["critical", "normal", "low"]);
        pool.stop().await;
    }

    #[tokio::test]
    async fn worker_task_flag_visible_inside_jobs() {
        let pool = DagPool::new();
        pool.start(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        pool.post(
            Box::pin(async move {
                let _ = tx.send(DagPool::is_dag_worker_task());
            }),
            TaskPriority::Normal,
        );
        assert!(rx.recv().await.unwrap());
        assert!(!DagPool::is_dag_worker_task());
        pool.stop().await;
    }

    #[tokio::test]
    async fn pool_grows_under_queued_load() {
        let pool = DagPool::new();
        pool.start(1);
        assert_eq!(pool.worker_count(), 1);

        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        // Occupy workers with blocking jobs, forcing growth for the rest.
        for _ in 0..4 {
            let mut rx = release_rx.clone();
            pool.post(
                Box::pin(async move {
                    while !*rx.borrow() {
                        if rx.changed().await.is_err() {
                            return;
                        }
                    }
                }),
                TaskPriority::Normal,
            );
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pool.worker_count() > 1);
        assert!(pool.worker_count() <= 4);

        let _ = release_tx.send(true);
        pool.stop().await;
    }
}
