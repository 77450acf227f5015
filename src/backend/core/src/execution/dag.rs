//! Nested DAG execution: a task whose payload is itself a DAG body.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{error, info};

use super::ExecutionStrategy;
use crate::dag::DagService;
use crate::runner::{ExecutionContext, MAX_NESTING_DEPTH};
use crate::task::{TaskResult, TaskStatus};

pub struct DagStrategy {
    service: Arc<DagService>,
}

impl DagStrategy {
    pub fn new(service: Arc<DagService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ExecutionStrategy for DagStrategy {
    async fn execute(&self, ctx: &ExecutionContext<'_>) -> TaskResult {
        let cfg = ctx.cfg;

        if ctx.is_canceled() {
            return ctx.canceled("canceled before dag execution");
        }
        if ctx.is_timeout() {
            return ctx.timeout("timeout before dag execution");
        }
        if ctx.nesting_depth() >= MAX_NESTING_DEPTH {
            let msg = format!("nesting depth exceeded (max {MAX_NESTING_DEPTH})");
            error!(task = %cfg.id, depth = ctx.nesting_depth(), "{msg}");
            let mut r = ctx.fail(msg);
            r.metadata.insert("retryable".into(), "false".into());
            return r;
        }

        let run_id = {
            let manual = ctx.get("manual_run_id", "");
            if manual.is_empty() { DagService::new_run_id() } else { manual }
        };

        info!(task = %cfg.id, run_id = %run_id, depth = ctx.nesting_depth(), "nested dag start");
        let start = Instant::now();
        let dag_result = self.service.run_from_task_config(cfg, Some(&run_id)).await;

        let mut result = TaskResult {
            status: if dag_result.success { TaskStatus::Success } else { TaskStatus::Failed },
            message: dag_result.message,
            exit_code: if dag_result.success { 0 } else { 1 },
            duration_ms: start.elapsed().as_millis() as i64,
            ..Default::default()
        };
        result.metadata.insert("run_id".into(), run_id);
        result
    }
}
