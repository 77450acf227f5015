//! DAG execution engine.
//!
//! - Task dependency resolution with runtime indegree tracking
//! - Cycle and dangling-dependency validation at build time
//! - Bounded-parallel execution on a shared priority pool
//! - FailFast / SkipDownstream failure propagation

mod builder;
mod context;
mod executor;
mod pool;
mod queue;
mod service;

pub use builder::DagBuilder;
pub use context::{DagEventCallbacks, DagRunContext};
pub use executor::DagExecutor;
pub use pool::DagPool;
pub use queue::PriorityQueue;
pub use service::DagService;

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::task::{task_result_to_json, TaskConfig, TaskId, TaskResult, TaskStatus};

/// Failure-propagation policy for a DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPolicy {
    /// Stop submitting new nodes after the first failure; running nodes
    /// finish naturally.
    FailFast,
    /// Mark the transitive downstream of a failed node as skipped and keep
    /// going elsewhere.
    SkipDownstream,
}

impl FailPolicy {
    pub fn parse(s: &str) -> FailPolicy {
        match s.to_ascii_lowercase().as_str() {
            "failfast" | "fail_fast" => FailPolicy::FailFast,
            _ => FailPolicy::SkipDownstream,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailPolicy::FailFast => "FailFast",
            FailPolicy::SkipDownstream => "SkipDownstream",
        }
    }
}

/// Per-run DAG configuration.
#[derive(Debug, Clone)]
pub struct DagConfig {
    pub fail_policy: FailPolicy,
    pub max_parallel: u32,
    pub dag_id: String,
    pub name: String,
}

impl Default for DagConfig {
    fn default() -> Self {
        Self { fail_policy: FailPolicy::SkipDownstream, max_parallel: 4, dag_id: String::new(), name: String::new() }
    }
}

impl DagConfig {
    /// Read the `config` object of a DAG body. `max_parallel <= 0` is
    /// coerced to 1.
    pub fn from_body(body: &Value) -> DagConfig {
        let mut cfg = DagConfig::default();
        if let Some(c) = body.get("config").filter(|c| c.is_object()) {
            if let Some(fp) = c.get("fail_policy").and_then(Value::as_str) {
                cfg.fail_policy = FailPolicy::parse(fp);
            }
            let mp = c.get("max_parallel").and_then(Value::as_i64).unwrap_or(4);
            cfg.max_parallel = mp.max(1) as u32;
            if let Some(name) = c.get("name").and_then(Value::as_str) {
                cfg.name = name.to_string();
            }
        }
        if cfg.name.is_empty() {
            if let Some(name) = body.get("name").and_then(Value::as_str) {
                cfg.name = name.to_string();
            }
        }
        cfg
    }
}

/// One task of a DAG submission: its identity, dependencies, and runner
/// config.
#[derive(Debug, Clone)]
pub struct DagTaskSpec {
    pub id: TaskId,
    pub deps: Vec<TaskId>,
    pub runner_cfg: TaskConfig,
}

/// Runtime DAG node. Created by the builder; the executor mutates only the
/// atomic `status` and `indegree`; `runner_cfg` is frozen after build.
pub struct DagNode {
    id: TaskId,
    deps: Vec<TaskId>,
    downstream: Vec<TaskId>,
    indegree: AtomicI32,
    status: AtomicI32,
    runner_cfg: TaskConfig,
}

impl DagNode {
    fn new(id: TaskId, deps: Vec<TaskId>, downstream: Vec<TaskId>, runner_cfg: TaskConfig) -> Self {
        let indegree = deps.len() as i32;
        Self {
            id,
            deps,
            downstream,
            indegree: AtomicI32::new(indegree),
            status: AtomicI32::new(TaskStatus::Pending.as_i32()),
            runner_cfg,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn deps(&self) -> &[TaskId] {
        &self.deps
    }

    pub fn downstream(&self) -> &[TaskId] {
        &self.downstream
    }

    pub fn indegree(&self) -> i32 {
        self.indegree.load(Ordering::Relaxed)
    }

    /// Returns the new indegree.
    pub fn decrement_indegree(&self) -> i32 {
        let old = self.indegree.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "indegree underflow on {}", self.id);
        old - 1
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_i32(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: TaskStatus) {
        self.status.store(status.as_i32(), Ordering::Release);
    }

    pub fn runner_cfg(&self) -> &TaskConfig {
        &self.runner_cfg
    }
}

/// Map of logical id to node. Insertion order is not significant; the
/// builder guarantees acyclicity and that every dep id exists.
#[derive(Default, Clone)]
pub struct DagGraph {
    nodes: HashMap<String, Arc<DagNode>>,
}

impl DagGraph {
    pub fn get(&self, id: &TaskId) -> Option<Arc<DagNode>> {
        self.nodes.get(&id.value).cloned()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<DagNode>> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn insert(&mut self, node: DagNode) {
        self.nodes.insert(node.id.value.clone(), Arc::new(node));
    }
}

/// Aggregate outcome of one DAG run.
#[derive(Debug, Default, Clone)]
pub struct DagResult {
    pub success: bool,
    pub message: String,
    pub run_id: String,
    pub task_ids: Vec<TaskId>,
    pub task_results: BTreeMap<TaskId, TaskResult>,
}

impl DagResult {
    pub fn nodes_json(&self) -> Value {
        let nodes: Vec<Value> = self
            .task_ids
            .iter()
            .filter_map(|id| {
                self.task_results.get(id).map(|r| {
                    json!({
                        "id": id.value,
                        "run_id": id.run_id,
                        "result": task_result_to_json(r),
                    })
                })
            })
            .collect();
        Value::Array(nodes)
    }

    /// `(total, success, failed, skipped)` where failed includes timeout
    /// and canceled nodes.
    pub fn summary(&self) -> (usize, usize, usize, usize) {
        let total = self.task_ids.len();
        let mut success = 0;
        let mut failed = 0;
        let mut skipped = 0;
        for r in self.task_results.values() {
            match r.status {
                TaskStatus::Success => success += 1,
                TaskStatus::Skipped => skipped += 1,
                TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Canceled => failed += 1,
                _ => {}
            }
        }
        (total, success, failed, skipped)
    }
}
