//! Cron-style recurring jobs.

mod parser;
mod scheduler;

pub use parser::CronExpr;
pub use scheduler::CronScheduler;

use chrono::{DateTime, Local};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{ErrorCode, Result, TaskHubError};
use crate::task::{parse_task_config, TaskConfig};

/// What a cron job dispatches when it fires.
#[derive(Debug, Clone)]
pub enum CronPayload {
    SingleTask(TaskConfig),
    Dag { body: Value },
    Template { template_id: String, params: Value },
}

impl CronPayload {
    pub fn target_type(&self) -> &'static str {
        match self {
            CronPayload::SingleTask(_) => "single_task",
            CronPayload::Dag { .. } => "dag",
            CronPayload::Template { .. } => "template",
        }
    }
}

/// One registered recurring job. `next_time` is recomputed after every
/// fire.
#[derive(Debug, Clone)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub spec: String,
    pub expr: CronExpr,
    pub next_time: DateTime<Local>,
    pub enabled: bool,
    pub payload: CronPayload,
}

impl CronJob {
    pub fn new(id: impl Into<String>, name: impl Into<String>, spec: &str, payload: CronPayload) -> Result<CronJob> {
        let expr = CronExpr::parse(spec)?;
        let next_time = expr.next(Local::now())?;
        let mut id = id.into();
        if id.is_empty() {
            id = format!("job_{}", &Uuid::new_v4().simple().to_string()[..8]);
        }
        Ok(CronJob { id, name: name.into(), spec: spec.to_string(), expr, next_time, enabled: true, payload })
    }

    /// Parse the registration body:
    /// `{id?, name, spec, target_type, task? | dag? | {template_id, params?}}`.
    pub fn from_body(body: &Value) -> Result<CronJob> {
        let spec = body
            .get("spec")
            .and_then(Value::as_str)
            .ok_or_else(|| TaskHubError::new(ErrorCode::MissingRequiredField, "spec is required"))?;
        let name = body.get("name").and_then(Value::as_str).unwrap_or_default();
        let id = body.get("id").and_then(Value::as_str).unwrap_or_default();
        let target = body.get("target_type").and_then(Value::as_str).unwrap_or("single_task");

        let payload = match target.to_ascii_lowercase().as_str() {
            "single_task" | "singletask" | "task" => {
                let task = body
                    .get("task")
                    .ok_or_else(|| TaskHubError::new(ErrorCode::MissingRequiredField, "task payload is required"))?;
                CronPayload::SingleTask(parse_task_config(task)?)
            }
            "dag" => {
                let dag = body
                    .get("dag")
                    .filter(|d| d.is_object())
                    .ok_or_else(|| TaskHubError::new(ErrorCode::MissingRequiredField, "dag payload is required"))?;
                CronPayload::Dag { body: dag.clone() }
            }
            "template" => {
                let template_id = body
                    .get("template_id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| TaskHubError::new(ErrorCode::MissingRequiredField, "template_id is required"))?;
                CronPayload::Template {
                    template_id: template_id.to_string(),
                    params: body.get("params").cloned().unwrap_or_else(|| json!({})),
                }
            }
            other => {
                return Err(TaskHubError::new(ErrorCode::InvalidParam, format!("unknown target_type: {other}")));
            }
        };

        let mut job = CronJob::new(id, name, spec, payload)?;
        if let Some(enabled) = body.get("enabled").and_then(Value::as_bool) {
            job.enabled = enabled;
        }
        Ok(job)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "spec": self.spec,
            "target_type": self.payload.target_type(),
            "enabled": self.enabled,
            "next_time_ms": self.next_time.timestamp_millis(),
        })
    }
}
