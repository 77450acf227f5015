//! Per-execution mutable DAG state.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use parking_lot::Mutex;

use super::{DagConfig, DagGraph};
use crate::task::{TaskId, TaskResult, TaskStatus};

type NodeStatusFn = Box<dyn Fn(&TaskId, TaskStatus) + Send + Sync>;
type DagFinishedFn = Box<dyn Fn(bool) + Send + Sync>;

/// Callbacks surfaced to the caller (UI, logging, tests).
#[derive(Default)]
pub struct DagEventCallbacks {
    pub on_node_status_changed: Option<NodeStatusFn>,
    pub on_dag_finished: Option<DagFinishedFn>,
}

/// State owned by a single `execute` call. Worker tasks read `graph` and
/// the atomics concurrently; `task_results` mutations are serialized by a
/// lock.
pub struct DagRunContext {
    config: DagConfig,
    graph: DagGraph,
    callbacks: DagEventCallbacks,
    running: AtomicI32,
    failed: AtomicBool,
    task_results: Mutex<BTreeMap<TaskId, TaskResult>>,
}

impl DagRunContext {
    pub fn new(config: DagConfig, graph: DagGraph, callbacks: DagEventCallbacks) -> Self {
        Self {
            config,
            graph,
            callbacks,
            running: AtomicI32::new(0),
            failed: AtomicBool::new(false),
            task_results: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &DagConfig {
        &self.config
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    pub fn increment_running(&self) {
        self.running.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decrement_running(&self) {
        self.running.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn running_count(&self) -> i32 {
        self.running.load(Ordering::Acquire)
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Update a node's status and fire the status callback.
    pub fn set_node_status(&self, id: &TaskId, status: TaskStatus) {
        if let Some(node) = self.graph.get(id) {
            node.set_status(status);
        }
        if let Some(cb) = &self.callbacks.on_node_status_changed {
            cb(id, status);
        }
    }

    pub fn set_task_result(&self, id: &TaskId, result: TaskResult) {
        self.task_results.lock().insert(id.clone(), result);
    }

    pub fn task_results(&self) -> BTreeMap<TaskId, TaskResult> {
        self.task_results.lock().clone()
    }

    pub fn finish(&self, success: bool) {
        if let Some(cb) = &self.callbacks.on_dag_finished {
            cb(success);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn running_counter_and_failure_flag() {
        let ctx = DagRunContext::new(DagConfig::default(), DagGraph::default(), DagEventCallbacks::default());
        ctx.increment_running();
        ctx.increment_running();
        ctx.decrement_running();
        assert_eq!(ctx.running_count(), 1);

        assert!(!ctx.is_failed());
        ctx.mark_failed();
        assert!(ctx.is_failed());
    }

    #[test]
    fn status_callback_fires() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let callbacks = DagEventCallbacks {
            on_node_status_changed: Some(Box::new(move |_id, _st| {
                hits2.fetch_add(1, Ordering::Relaxed);
            })),
            on_dag_finished: None,
        };
        let ctx = DagRunContext::new(DagConfig::default(), DagGraph::default(), callbacks);
        ctx.set_node_status(&TaskId::new("x"), TaskStatus::Running);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}
