//! DAG run orchestration: JSON body -> validated graph -> executed run,
//! with run-id injection and persistence on the way in and a summary on
//! the way out.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use super::{DagBuilder, DagConfig, DagEventCallbacks, DagExecutor, DagPool, DagResult, DagRunContext, DagTaskSpec};
use crate::runner::TaskRunner;
use crate::store::RunStore;
use crate::task::{extract_dag_body, parse_task_config, TaskConfig, TaskId, TaskStatus};
use crate::ws::WsLogStreamer;

pub struct DagService {
    runner: Arc<TaskRunner>,
    pool: Arc<DagPool>,
    store: Arc<dyn RunStore>,
    streamer: Arc<WsLogStreamer>,
}

impl DagService {
    pub fn new(
        runner: Arc<TaskRunner>,
        pool: Arc<DagPool>,
        store: Arc<dyn RunStore>,
        streamer: Arc<WsLogStreamer>,
    ) -> Self {
        Self { runner, pool, store, streamer }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    pub fn runner(&self) -> &Arc<TaskRunner> {
        &self.runner
    }

    pub fn new_run_id() -> String {
        let tag = Uuid::new_v4().simple().to_string();
        format!("{}_{}", Utc::now().timestamp_millis(), &tag[..6])
    }

    /// Write the run id into the common payload shapes so downstream
    /// consumers and archived rows can correlate.
    pub fn inject_run_id(body: &mut Value, run_id: &str) {
        if let Some(tasks) = body.get_mut("tasks").and_then(Value::as_array_mut) {
            for task in tasks {
                task["run_id"] = Value::String(run_id.to_string());
            }
        } else if let Some(task) = body.get_mut("task").filter(|t| t.is_object()) {
            task["run_id"] = Value::String(run_id.to_string());
        } else {
            body["run_id"] = Value::String(run_id.to_string());
        }
    }

    /// Insert the `dag_run` row and the initial pending `task_run` rows.
    pub async fn persist_run_and_tasks(&self, run_id: &str, body: &Value, source: &str) {
        let name = body
            .get("name")
            .and_then(Value::as_str)
            .or_else(|| body.get("config").and_then(|c| c.get("name")).and_then(Value::as_str))
            .unwrap_or_default();
        let _ = self
            .store
            .insert_run(run_id, name, source, &body.to_string(), "", Utc::now().timestamp_millis())
            .await;

        if let Some(tasks) = body.get("tasks").and_then(Value::as_array) {
            for task in tasks {
                let _ = self.store.upsert_task_from_json(run_id, task).await;
            }
        } else if let Some(task) = body.get("task").filter(|t| t.is_object()) {
            let _ = self.store.upsert_task_from_json(run_id, task).await;
        } else if body.get("id").is_some() {
            let _ = self.store.upsert_task_from_json(run_id, body).await;
        }
    }

    /// Execute a DAG described by a task config (`Dag` exec type payload).
    pub async fn run_from_task_config(&self, cfg: &TaskConfig, run_id: Option<&str>) -> DagResult {
        let mut body = match extract_dag_body(cfg) {
            Ok(b) => b,
            Err(e) => {
                return DagResult { success: false, message: e.message().to_string(), ..Default::default() };
            }
        };
        // Forward the caller's nesting depth into the body so the child
        // tasks inherit depth + 1.
        if let Some(depth) = cfg.param("_nesting_depth").and_then(|d| d.parse::<i64>().ok()) {
            body["_nesting_depth"] = Value::from(depth);
        }
        self.run_body(body, "execution", run_id).await
    }

    /// Execute a DAG body (`{name?, config?, tasks: [...]}` or a single
    /// `{task: {...}}` envelope).
    pub async fn run_body(&self, body: Value, source: &str, run_id: Option<&str>) -> DagResult {
        let run_id = run_id.map(str::to_string).unwrap_or_else(Self::new_run_id);

        let mut body = body;
        Self::inject_run_id(&mut body, &run_id);
        self.persist_run_and_tasks(&run_id, &body, source).await;

        let mut config = DagConfig::from_body(&body);
        config.dag_id = run_id.clone();

        let fail = |message: String| DagResult {
            success: false,
            message,
            run_id: run_id.clone(),
            ..Default::default()
        };

        let tasks: Vec<Value> = if let Some(tasks) = body.get("tasks").and_then(Value::as_array) {
            tasks.clone()
        } else if let Some(task) = body.get("task").filter(|t| t.is_object()) {
            vec![task.clone()]
        } else {
            let dr = fail("missing or invalid tasks array or object".into());
            self.finish(&run_id, 0, 0, 0, 0, false, &dr.message).await;
            return dr;
        };
        let total = tasks.len() as i64;

        let parent_depth = body.get("_nesting_depth").and_then(Value::as_i64).unwrap_or(0);
        let child_depth = parent_depth + 1;

        let mut builder = DagBuilder::new();
        let mut task_ids: Vec<TaskId> = Vec::with_capacity(tasks.len());
        for jtask in &tasks {
            let mut task_cfg = match parse_task_config(jtask) {
                Ok(c) => c,
                Err(e) => {
                    let dr = fail(format!("parse task failed: {}", e.message()));
                    self.finish(&run_id, total, 0, total, 0, false, &dr.message).await;
                    return dr;
                }
            };
            task_cfg.id.run_id = run_id.clone();
            task_cfg.exec_params.insert("_nesting_depth".into(), child_depth.to_string());

            let deps = jtask
                .get("deps")
                .and_then(Value::as_array)
                .map(|deps| {
                    deps.iter()
                        .filter_map(Value::as_str)
                        .map(|d| TaskId::with_run(d, run_id.clone()))
                        .collect()
                })
                .unwrap_or_default();

            task_ids.push(task_cfg.id.clone());
            builder.add_task(DagTaskSpec { id: task_cfg.id.clone(), deps, runner_cfg: task_cfg });
        }

        if let Err(e) = builder.validate() {
            let dr = fail(e.message().to_string());
            self.finish(&run_id, total, 0, total, 0, false, &dr.message).await;
            return dr;
        }
        let graph = builder.build();

        let dag_id = run_id.clone();
        let callbacks = DagEventCallbacks {
            on_node_status_changed: None,
            on_dag_finished: Some(Box::new(move |success| {
                info!(dag = %dag_id, success, "dag run finished");
            })),
        };
        let ctx = Arc::new(DagRunContext::new(config, graph, callbacks));

        // A fresh executor per run: the ready queue must not be shared
        // with a nested or concurrent execution.
        let executor = DagExecutor::new(
            Arc::clone(&self.runner),
            Arc::clone(&self.pool),
            Arc::clone(&self.store),
            Arc::clone(&self.streamer),
        );
        let outcome = executor.execute(Arc::clone(&ctx)).await;

        let mut dr = DagResult {
            success: outcome.ok(),
            message: outcome.message,
            run_id: run_id.clone(),
            task_ids,
            task_results: ctx.task_results(),
        };
        if dr.success {
            dr.message = String::new();
        }

        let (sum_total, success, failed, skipped) = dr.summary();
        self.finish(&run_id, sum_total as i64, success as i64, failed as i64, skipped as i64, dr.success, &dr.message)
            .await;
        dr
    }

    async fn finish(&self, run_id: &str, total: i64, success: i64, failed: i64, skipped: i64, ok: bool, message: &str) {
        let status = if ok { TaskStatus::Success.as_i32() } else { TaskStatus::Failed.as_i32() } as i64;
        let _ = self
            .store
            .finish_run(run_id, status, Utc::now().timestamp_millis(), total, success, failed, skipped, message)
            .await;
    }
}
