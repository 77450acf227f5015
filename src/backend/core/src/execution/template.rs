//! Template execution: resolve, render, then run as a DAG.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::ExecutionStrategy;
use crate::dag::DagService;
use crate::runner::{ExecutionContext, MAX_NESTING_DEPTH};
use crate::task::{TaskResult, TaskStatus};
use crate::template::TemplateService;

pub struct TemplateStrategy {
    templates: Arc<TemplateService>,
    dags: Arc<DagService>,
}

impl TemplateStrategy {
    pub fn new(templates: Arc<TemplateService>, dags: Arc<DagService>) -> Self {
        Self { templates, dags }
    }
}

#[async_trait]
impl ExecutionStrategy for TemplateStrategy {
    async fn execute(&self, ctx: &ExecutionContext<'_>) -> TaskResult {
        let cfg = ctx.cfg;

        if ctx.is_canceled() {
            return ctx.canceled("canceled before template execution");
        }
        if ctx.is_timeout() {
            return ctx.timeout("timeout before template execution");
        }
        if ctx.nesting_depth() >= MAX_NESTING_DEPTH {
            let mut r = ctx.fail(format!("nesting depth exceeded (max {MAX_NESTING_DEPTH})"));
            r.metadata.insert("retryable".into(), "false".into());
            return r;
        }

        let template_id = ctx.get("template_id", "");
        if template_id.is_empty() {
            return ctx.fail("missing template_id");
        }

        let params_raw = ctx.get("template_params_json", "");
        let params: Value = if params_raw.is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(&params_raw) {
                Ok(Value::Object(m)) => Value::Object(m),
                Ok(_) | Err(_) => return ctx.fail("invalid template_params_json"),
            }
        };

        let mut rendered = match self.templates.render_by_id(&template_id, &params).await {
            Ok(r) => r,
            Err(e) => return ctx.fail(e.message().to_string()),
        };

        // Stamp lineage into the rendered config block.
        if !rendered.get("config").map(Value::is_object).unwrap_or(false) {
            rendered["config"] = Value::Object(Default::default());
        }
        rendered["config"]["template_id"] = Value::String(template_id.clone());
        if !cfg.id.run_id.is_empty() {
            rendered["config"]["parent_run_id"] = Value::String(cfg.id.run_id.clone());
        }
        if !cfg.id.value.is_empty() {
            rendered["config"]["parent_task_id"] = Value::String(cfg.id.value.clone());
        }
        // Nested runs inherit this task's depth.
        rendered["_nesting_depth"] = Value::from(ctx.nesting_depth() as i64);

        let run_id = {
            let manual = ctx.get("manual_run_id", "");
            if manual.is_empty() { DagService::new_run_id() } else { manual }
        };

        info!(task = %cfg.id, template = %template_id, run_id = %run_id, "template execution start");
        let start = Instant::now();
        let dag_result = self.dags.run_body(rendered, "task_template", Some(&run_id)).await;

        let mut result = TaskResult {
            status: if dag_result.success { TaskStatus::Success } else { TaskStatus::Failed },
            message: dag_result.message,
            duration_ms: start.elapsed().as_millis() as i64,
            ..Default::default()
        };
        result.metadata.insert("run_id".into(), run_id);
        result.metadata.insert("template_id".into(), template_id);
        result
    }
}
