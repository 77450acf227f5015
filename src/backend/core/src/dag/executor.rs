//! Topological DAG scheduler honoring `max_parallel` and the fail policy.
//!
//! One executor instance serves exactly one run; the ready queue must not
//! leak across nested DAG executions.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;
use tracing::{info, warn};

use super::pool::DagPool;
use super::{DagRunContext, FailPolicy};
use crate::runner::TaskRunner;
use crate::store::RunStore;
use crate::task::{TaskId, TaskResult, TaskStatus};
use crate::ws::WsLogStreamer;

pub struct DagExecutor {
    runner: Arc<TaskRunner>,
    pool: Arc<DagPool>,
    store: Arc<dyn RunStore>,
    streamer: Arc<WsLogStreamer>,
    ready: Mutex<VecDeque<TaskId>>,
    /// Signaled on: a node becoming ready, a node finishing, FailFast
    /// failure.
    progress: Notify,
}

impl DagExecutor {
    pub fn new(
        runner: Arc<TaskRunner>,
        pool: Arc<DagPool>,
        store: Arc<dyn RunStore>,
        streamer: Arc<WsLogStreamer>,
    ) -> Arc<Self> {
        Arc::new(Self { runner, pool, store, streamer, ready: Mutex::new(VecDeque::new()), progress: Notify::new() })
    }

    /// Run the DAG to completion. Returns `Success` unless any node ended
    /// in a failure-class status.
    pub async fn execute(self: Arc<Self>, ctx: Arc<DagRunContext>) -> TaskResult {
        let max_parallel = ctx.config().max_parallel.max(1) as i32;
        let fail_fast = ctx.config().fail_policy == FailPolicy::FailFast;

        self.seed_ready_queue(&ctx);

        loop {
            // Fill the parallelism budget from the ready queue.
            while ctx.running_count() < max_parallel {
                let id = match self.ready.lock().pop_front() {
                    Some(id) => id,
                    None => break,
                };

                // A node can reach the queue and then be finished or
                // skipped by an upstream failure before we get here; the
                // status gate drops it instead of running it twice.
                if let Some(node) = ctx.graph().get(&id) {
                    if node.status() != TaskStatus::Pending {
                        continue;
                    }
                }

                if fail_fast && ctx.is_failed() {
                    continue;
                }

                self.submit_node(&ctx, id).await;
            }

            {
                let ready = self.ready.lock();
                if ready.is_empty() && ctx.running_count() == 0 {
                    break;
                }
            }

            // Every wake source (new ready node, node finish, FailFast
            // failure) signals `progress`, so sleeping is safe whenever
            // there is neither a ready node nor a finished count to act
            // on.
            let notified = self.progress.notified();
            let wake = {
                let ready = self.ready.lock();
                !ready.is_empty() || ctx.running_count() == 0
            };
            if !wake {
                notified.await;
            }
        }

        let result = if ctx.is_failed() {
            TaskResult::failed("dag failed")
        } else {
            TaskResult::success("")
        };
        ctx.finish(result.ok());
        info!(dag = %ctx.config().dag_id, success = result.ok(), "dag finished");
        result
    }

    fn seed_ready_queue(&self, ctx: &Arc<DagRunContext>) {
        let mut ready = self.ready.lock();
        for node in ctx.graph().nodes() {
            if node.indegree() == 0 {
                ready.push_back(node.id().clone());
                self.streamer.push_task_event(
                    &node.id().value,
                    "dag_node_ready",
                    json!({ "indegree": 0, "run_id": node.id().run_id }),
                    &node.id().run_id,
                );
            }
        }
    }

    async fn submit_node(self: &Arc<Self>, ctx: &Arc<DagRunContext>, id: TaskId) {
        let Some(node) = ctx.graph().get(&id) else {
            return;
        };
        // Second line of defense against the enqueue/skip race.
        if node.status() != TaskStatus::Pending {
            return;
        }

        ctx.set_node_status(&id, TaskStatus::Running);
        ctx.increment_running();
        if !id.run_id.is_empty() {
            if let Err(e) = self.store.mark_task_running(&id.run_id, &id.value, Utc::now().timestamp_millis()).await {
                warn!(task = %id, error = %e, "mark_task_running failed");
            }
        }
        self.streamer.push_task_event(
            &id.value,
            "dag_node_start",
            json!({
                "exec_type": node.runner_cfg().exec_type.as_str(),
                "queue": node.runner_cfg().queue,
                "run_id": id.run_id,
            }),
            &id.run_id,
        );

        // Nested DAG on a pool worker: run in place instead of re-queueing,
        // otherwise the child could wait forever on the worker it occupies.
        if DagPool::is_dag_worker_task() {
            let result = self.runner.run(node.runner_cfg(), None).await;
            self.on_node_finished(ctx, &id, result).await;
            return;
        }

        // Dag/Template nodes hold a worker for the entire child run; make
        // sure a spare exists before they queue.
        if matches!(node.runner_cfg().exec_type, crate::task::TaskExecType::Dag | crate::task::TaskExecType::Template) {
            self.pool.maybe_spawn_worker();
        }

        let priority = node.runner_cfg().priority;
        let executor = Arc::clone(self);
        let ctx = Arc::clone(ctx);
        self.pool.post(
            Box::pin(async move {
                let result = match ctx.graph().get(&id) {
                    Some(node) => executor.runner.run(node.runner_cfg(), None).await,
                    None => TaskResult::failed("node not found in graph"),
                };
                executor.on_node_finished(&ctx, &id, result).await;
            }),
            priority,
        );
    }

    async fn on_node_finished(&self, ctx: &Arc<DagRunContext>, id: &TaskId, result: TaskResult) {
        let Some(node) = ctx.graph().get(id) else {
            ctx.decrement_running();
            self.progress.notify_one();
            return;
        };

        ctx.set_task_result(id, result.clone());
        if !id.run_id.is_empty() {
            if let Err(e) =
                self.store.mark_task_finished(&id.run_id, &id.value, &result, Utc::now().timestamp_millis()).await
            {
                warn!(task = %id, error = %e, "mark_task_finished failed");
            }
        }

        self.streamer.push_task_event(
            &id.value,
            "dag_node_end",
            json!({
                "status": result.status.as_str(),
                "duration_ms": result.duration_ms,
                "exit_code": result.exit_code,
                "run_id": id.run_id,
            }),
            &id.run_id,
        );

        if result.ok() {
            ctx.set_node_status(id, TaskStatus::Success);

            for child_id in node.downstream() {
                let Some(child) = ctx.graph().get(child_id) else {
                    continue;
                };
                if child.status().is_terminal() {
                    continue;
                }
                if child.decrement_indegree() == 0 && child.status() == TaskStatus::Pending {
                    self.ready.lock().push_back(child_id.clone());
                    self.streamer.push_task_event(
                        &child_id.value,
                        "dag_node_ready",
                        json!({ "indegree": 0, "parent": id.value, "run_id": child_id.run_id }),
                        &child_id.run_id,
                    );
                }
            }
        } else {
            let terminal = match result.status {
                TaskStatus::Timeout => TaskStatus::Timeout,
                TaskStatus::Canceled => TaskStatus::Canceled,
                _ => TaskStatus::Failed,
            };
            ctx.set_node_status(id, terminal);
            ctx.mark_failed();

            match ctx.config().fail_policy {
                FailPolicy::FailFast => {
                    // The main loop stops consuming the queue; running
                    // nodes are left to finish naturally.
                    ctx.decrement_running();
                    self.progress.notify_one();
                    return;
                }
                FailPolicy::SkipDownstream => {
                    self.skip_downstream(ctx, id).await;
                }
            }
        }

        ctx.decrement_running();
        self.progress.notify_one();
    }

    /// BFS the transitive downstream of a failed node, marking each
    /// reachable node skipped exactly once.
    async fn skip_downstream(&self, ctx: &Arc<DagRunContext>, failed_id: &TaskId) {
        let Some(failed_node) = ctx.graph().get(failed_id) else {
            return;
        };

        let mut visited: HashSet<String> = HashSet::new();
        let mut to_visit: VecDeque<TaskId> = VecDeque::new();
        for child in failed_node.downstream() {
            if visited.insert(child.value.clone()) {
                to_visit.push_back(child.clone());
            }
        }

        while let Some(child_id) = to_visit.pop_front() {
            let Some(child) = ctx.graph().get(&child_id) else {
                continue;
            };

            // Only pending nodes flip to Skipped; nodes that completed (or
            // are still running) before the failure propagated keep their
            // own outcome. Their downstream is still transitively
            // reachable from the failure, so the walk continues either
            // way.
            if child.status() == TaskStatus::Pending {
                ctx.set_node_status(&child_id, TaskStatus::Skipped);
                ctx.set_task_result(&child_id, TaskResult { status: TaskStatus::Skipped, ..Default::default() });
                if !child_id.run_id.is_empty() {
                    let reason = format!("skip_downstream upstream={}", failed_id.value);
                    if let Err(e) = self
                        .store
                        .mark_task_skipped(&child_id.run_id, &child_id.value, &reason, Utc::now().timestamp_millis())
                        .await
                    {
                        warn!(task = %child_id, error = %e, "mark_task_skipped failed");
                    }
                }
                self.streamer.push_task_event(
                    &child_id.value,
                    "dag_node_skipped",
                    json!({
                        "reason": "skip_downstream",
                        "upstream": failed_id.value,
                        "run_id": child_id.run_id,
                    }),
                    &child_id.run_id,
                );
            }

            for grandchild in child.downstream() {
                if visited.insert(grandchild.value.clone()) {
                    to_visit.push_back(grandchild.clone());
                }
            }
        }
    }
}
