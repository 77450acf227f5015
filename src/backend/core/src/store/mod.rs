//! Run persistence behind async traits.
//!
//! The engine only ever talks to [`RunStore`] and [`TemplateStore`];
//! production wires the SQLite implementation, tests use the in-memory
//! one.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::task::TaskResult;

/// One `dag_run` row.
#[derive(Debug, Clone, Default, sqlx::FromRow, serde::Serialize)]
pub struct DagRunRow {
    pub run_id: String,
    pub name: String,
    pub source: String,
    pub status: i64,
    pub start_ts_ms: i64,
    pub end_ts_ms: Option<i64>,
    pub total: i64,
    pub success_count: i64,
    pub failed_count: i64,
    pub skipped_count: i64,
    pub message: String,
    pub dag_json: String,
    pub workflow_json: String,
}

/// One `task_run` row. `task_id` is the logical id; `(run_id, task_id)` is
/// unique.
#[derive(Debug, Clone, Default, sqlx::FromRow, serde::Serialize)]
pub struct TaskRunRow {
    pub id: i64,
    pub run_id: String,
    pub task_id: String,
    pub name: String,
    pub exec_type: String,
    pub exec_command: String,
    pub exec_params_json: String,
    pub deps_json: String,
    pub status: i64,
    pub exit_code: i64,
    pub duration_ms: i64,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
    pub attempt: i64,
    pub max_attempts: i64,
    pub start_ts_ms: Option<i64>,
    pub end_ts_ms: Option<i64>,
    pub worker_id: String,
    pub worker_host: String,
    pub worker_port: i64,
    pub metadata_json: String,
}

/// One `task_event` row.
#[derive(Debug, Clone, Default, sqlx::FromRow, serde::Serialize)]
pub struct TaskEventRow {
    pub id: i64,
    pub run_id: String,
    pub task_id: String,
    pub kind: String,
    pub event: String,
    pub ts_ms: i64,
    pub payload_json: String,
}

/// One `task_template` row.
#[derive(Debug, Clone, Default, sqlx::FromRow, serde::Serialize)]
pub struct TemplateRow {
    pub template_id: String,
    pub name: String,
    pub description: String,
    pub task_json_template: String,
    pub schema_json: String,
    pub created_ts_ms: i64,
    pub updated_ts_ms: i64,
}

/// Time/name/run filters shared by the query endpoints.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub run_id: Option<String>,
    pub name: Option<String>,
    pub start_ts_ms: Option<i64>,
    pub end_ts_ms: Option<i64>,
    pub limit: usize,
}

/// DAG-run, task-run, and task-event persistence.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert_run(
        &self,
        run_id: &str,
        name: &str,
        source: &str,
        dag_json: &str,
        workflow_json: &str,
        start_ts_ms: i64,
    ) -> Result<()>;

    #[allow(clippy::too_many_arguments)]
    async fn finish_run(
        &self,
        run_id: &str,
        status: i64,
        end_ts_ms: i64,
        total: i64,
        success: i64,
        failed: i64,
        skipped: i64,
        message: &str,
    ) -> Result<()>;

    /// Insert or refresh the pending row for one task of a run.
    async fn upsert_task_from_json(&self, run_id: &str, task: &Value) -> Result<()>;

    async fn mark_task_running(&self, run_id: &str, task_id: &str, ts_ms: i64) -> Result<()>;

    async fn mark_task_finished(&self, run_id: &str, task_id: &str, result: &TaskResult, ts_ms: i64) -> Result<()>;

    async fn mark_task_skipped(&self, run_id: &str, task_id: &str, reason: &str, ts_ms: i64) -> Result<()>;

    async fn insert_event(
        &self,
        run_id: &str,
        task_id: &str,
        kind: &str,
        event: &str,
        ts_ms: i64,
        payload_json: &str,
    ) -> Result<()>;

    async fn query_runs(&self, filter: &QueryFilter) -> Result<Vec<DagRunRow>>;

    async fn query_task_runs(&self, filter: &QueryFilter) -> Result<Vec<TaskRunRow>>;

    async fn query_events(&self, filter: &QueryFilter) -> Result<Vec<TaskEventRow>>;
}

/// Reusable parameterized task templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn upsert_template(&self, row: &TemplateRow) -> Result<()>;
    async fn get_template(&self, template_id: &str) -> Result<Option<TemplateRow>>;
    async fn delete_template(&self, template_id: &str) -> Result<bool>;
    async fn list_templates(&self) -> Result<Vec<TemplateRow>>;
}

pub(crate) fn task_row_from_json(run_id: &str, task: &Value) -> TaskRunRow {
    let get = |key: &str| task.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    TaskRunRow {
        run_id: run_id.to_string(),
        task_id: get("id"),
        name: get("name"),
        exec_type: get("exec_type"),
        exec_command: get("exec_command"),
        exec_params_json: task.get("exec_params").map(|v| v.to_string()).unwrap_or_else(|| "{}".into()),
        deps_json: task.get("deps").map(|v| v.to_string()).unwrap_or_else(|| "[]".into()),
        metadata_json: task.get("metadata").map(|v| v.to_string()).unwrap_or_else(|| "{}".into()),
        status: 0,
        attempt: 0,
        max_attempts: 0,
        ..Default::default()
    }
}
