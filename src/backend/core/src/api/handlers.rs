//! REST request handlers.
//!
//! Handlers return `Result<Json<Envelope>, TaskHubError>`; errors map to
//! the envelope plus an HTTP status through `IntoResponse` on the error
//! type.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::error::{Envelope, ErrorCode, Result, TaskHubError};
use crate::logging::LogRecord;
use crate::store::QueryFilter;
use crate::task::{parse_task_config, task_result_to_json, TaskId};
use crate::worker::WorkerInfo;

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

// ── Auth ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Result<Json<Envelope>> {
    match state.auth.login(&req.username, &req.password) {
        Some(token) => Ok(Json(Envelope::ok(json!({ "token": token })))),
        None => Err(TaskHubError::new(ErrorCode::BadCredentials, "bad credentials")),
    }
}

// ── Single tasks ─────────────────────────────────────────────────────

pub async fn create_task(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Json<Envelope>> {
    let cfg = parse_task_config(&body)?;
    let id = cfg.id.value.clone();
    let run_id = state.schedule_task(cfg).await?;
    Ok(Json(Envelope::ok(json!({ "id": id, "run_id": run_id }))))
}

fn parse_filter(params: &HashMap<String, String>, max_limit: usize) -> QueryFilter {
    let limit = params
        .get("limit")
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(100)
        .clamp(1, max_limit);
    QueryFilter {
        run_id: params.get("run_id").cloned().filter(|s| !s.is_empty()),
        name: params.get("name").cloned().filter(|s| !s.is_empty()),
        start_ts_ms: params.get("start_ts_ms").and_then(|s| s.parse().ok()),
        end_ts_ms: params.get("end_ts_ms").and_then(|s| s.parse().ok()),
        limit,
    }
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Envelope>> {
    let filter = parse_filter(&params, 500);
    let rows = state.run_store.query_task_runs(&filter).await?;
    Ok(Json(Envelope::ok(serde_json::to_value(rows)?)))
}

pub async fn task_detail(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Envelope>> {
    let filter = QueryFilter { limit: 500, ..Default::default() };
    let rows = state.run_store.query_task_runs(&filter).await?;
    let row = rows
        .into_iter()
        .find(|r| r.task_id == id)
        .ok_or_else(|| TaskHubError::not_found("task", &id))?;
    Ok(Json(Envelope::ok(serde_json::to_value(row)?)))
}

pub async fn cancel_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Envelope>> {
    state.cancel_task(&id)?;
    Ok(Json(Envelope::ok(Value::Null)))
}

// ── DAG runs ─────────────────────────────────────────────────────────

pub async fn run_dag(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Json<Envelope>> {
    let result = state.run_dag(body, "manual").await;
    let (total, success, failed, skipped) = result.summary();
    let nodes = result.nodes_json();
    let data = json!({
        "ok": result.success,
        "message": result.message.clone(),
        "run_id": result.run_id,
        "nodes": nodes,
        "summary": { "total": total, "success": success, "failed": failed, "skipped": skipped },
    });
    if result.success {
        Ok(Json(Envelope::ok(data)))
    } else {
        Ok(Json(Envelope { code: ErrorCode::DagFailed.business_code(), message: result.message, data }))
    }
}

pub async fn run_dag_async(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Json<Envelope>> {
    let (run_id, task_ids) = state.run_dag_async(body, "manual")?;
    Ok(Json(Envelope::ok(json!({ "run_id": run_id, "task_ids": task_ids }))))
}

pub async fn query_dag_runs(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Envelope>> {
    let filter = parse_filter(&params, 500);
    let rows = state.run_store.query_runs(&filter).await?;
    Ok(Json(Envelope::ok(serde_json::to_value(rows)?)))
}

pub async fn query_task_runs(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Envelope>> {
    let filter = parse_filter(&params, 1000);
    let rows = state.run_store.query_task_runs(&filter).await?;
    Ok(Json(Envelope::ok(serde_json::to_value(rows)?)))
}

pub async fn query_task_events(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Envelope>> {
    let filter = parse_filter(&params, 1000);
    let rows = state.run_store.query_events(&filter).await?;
    Ok(Json(Envelope::ok(serde_json::to_value(rows)?)))
}

// ── Task logs ────────────────────────────────────────────────────────

fn log_record_json(r: &LogRecord) -> Value {
    let mut j = json!({
        "seq": r.seq,
        "task_id": r.task_id.value,
        "level": r.level as i32,
        "stream": r.stream as i32,
        "message": r.message,
        "ts_ms": r.ts_ms(),
        "duration_ms": r.duration_ms,
        "attempt": r.attempt,
        "fields": r.fields,
    });
    if !r.task_id.run_id.is_empty() {
        j["run_id"] = Value::String(r.task_id.run_id.clone());
    }
    if !r.dag_run_id.is_empty() {
        j["dag_run_id"] = Value::String(r.dag_run_id.clone());
    }
    if !r.cron_job_id.is_empty() {
        j["cron_job_id"] = Value::String(r.cron_job_id.clone());
    }
    if !r.worker_id.is_empty() {
        j["worker_id"] = Value::String(r.worker_id.clone());
    }
    j
}

pub async fn task_logs(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Envelope>> {
    let task_id = params
        .get("task_id")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TaskHubError::new(ErrorCode::MissingRequiredField, "missing task_id"))?;
    let run_id = params.get("run_id").cloned().unwrap_or_default();
    let from = params.get("from").and_then(|s| s.parse::<u64>().ok()).unwrap_or(1);
    let limit = params.get("limit").and_then(|s| s.parse::<usize>().ok()).unwrap_or(200).clamp(1, 2000);

    let id = TaskId::with_run(task_id.clone(), run_id);
    let result = state.log.query(&id, from, limit);

    Ok(Json(Envelope::ok(json!({
        "task_id": task_id,
        "from": from,
        "limit": limit,
        "next_from": result.next_from,
        "records": result.records.iter().map(log_record_json).collect::<Vec<_>>(),
    }))))
}

// ── Templates ────────────────────────────────────────────────────────

pub async fn register_template(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Json<Envelope>> {
    let data = state.register_template(&body).await?;
    Ok(Json(Envelope::ok(data)))
}

pub async fn get_template(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Envelope>> {
    let tpl = state.templates.get(&id).await?;
    Ok(Json(Envelope::ok(serde_json::to_value(tpl)?)))
}

pub async fn delete_template(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Envelope>> {
    state.templates.delete(&id).await?;
    Ok(Json(Envelope::ok(Value::Null)))
}

pub async fn list_templates(State(state): State<AppState>) -> Result<Json<Envelope>> {
    let templates = state.templates.list().await?;
    Ok(Json(Envelope::ok(serde_json::to_value(templates)?)))
}

#[derive(Deserialize)]
pub struct TemplateRunRequest {
    pub template_id: String,
    #[serde(default)]
    pub params: Value,
}

pub async fn render_template(
    State(state): State<AppState>,
    Json(req): Json<TemplateRunRequest>,
) -> Result<Json<Envelope>> {
    let rendered = state.templates.render_by_id(&req.template_id, &req.params).await?;
    Ok(Json(Envelope::ok(rendered)))
}

pub async fn run_template(State(state): State<AppState>, Json(req): Json<TemplateRunRequest>) -> Result<Json<Envelope>> {
    let mut rendered = state.templates.render_by_id(&req.template_id, &req.params).await?;
    if !rendered.get("config").map(Value::is_object).unwrap_or(false) {
        rendered["config"] = Value::Object(Default::default());
    }
    rendered["config"]["template_id"] = Value::String(req.template_id.clone());

    let result = state.run_dag(rendered, "task_template").await;
    let (total, success, failed, skipped) = result.summary();
    Ok(Json(Envelope::ok(json!({
        "ok": result.success,
        "message": result.message,
        "run_id": result.run_id,
        "summary": { "total": total, "success": success, "failed": failed, "skipped": skipped },
    }))))
}

// ── Workers ──────────────────────────────────────────────────────────

pub async fn workers_register(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Json<Envelope>> {
    let id = body.get("id").and_then(Value::as_str).unwrap_or_default();
    let port = body.get("port").and_then(Value::as_i64).unwrap_or(0);
    if id.is_empty() || port <= 0 {
        return Err(TaskHubError::new(ErrorCode::MissingRequiredField, "missing required fields: id/port"));
    }

    let mut info = WorkerInfo::new(id, body.get("host").and_then(Value::as_str).unwrap_or("127.0.0.1"), port as u16);
    let strings = |key: &str| -> Vec<String> {
        body.get(key)
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    };
    info.queues = strings("queues");
    info.labels = strings("labels");
    info.running_tasks = body.get("running_tasks").and_then(Value::as_i64).unwrap_or(0).max(0) as u32;
    info.max_running_tasks = body.get("max_running_tasks").and_then(Value::as_i64).unwrap_or(1).max(1) as u32;

    state.workers.upsert(info);
    Ok(Json(Envelope::ok(Value::Null)))
}

pub async fn workers_heartbeat(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Json<Envelope>> {
    let id = body
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| TaskHubError::new(ErrorCode::MissingRequiredField, "missing worker id"))?;
    let running = body.get("running_tasks").and_then(Value::as_i64).unwrap_or(0).max(0) as u32;

    if !state.workers.touch_heartbeat(id, running) {
        return Err(TaskHubError::not_found("worker", id));
    }
    Ok(Json(Envelope::ok(Value::Null)))
}

pub async fn workers_list(State(state): State<AppState>) -> Result<Json<Envelope>> {
    let workers: Vec<Value> = state.workers.list().iter().map(WorkerInfo::to_json).collect();
    Ok(Json(Envelope::ok(Value::Array(workers))))
}

/// Worker-mode endpoint: a master pushes one concrete task here.
pub async fn worker_execute(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Json<Value>> {
    let cfg = parse_task_config(&body)?;
    let result = state.execute_for_master(&cfg).await?;
    Ok(Json(task_result_to_json(&result)))
}

// ── Cron jobs ────────────────────────────────────────────────────────

pub async fn create_cron_job(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Json<Envelope>> {
    let id = state.register_cron(&body)?;
    Ok(Json(Envelope::ok(json!({ "id": id }))))
}

pub async fn list_cron_jobs(State(state): State<AppState>) -> Result<Json<Envelope>> {
    Ok(Json(Envelope::ok(Value::Array(state.cron.list_jobs()))))
}

pub async fn delete_cron_job(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Envelope>> {
    if !state.cron.remove_job(&id) {
        return Err(TaskHubError::not_found("cron", &id));
    }
    Ok(Json(Envelope::ok(Value::Null)))
}
