//! In-memory store for tests and facade construction without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::{task_row_from_json, DagRunRow, QueryFilter, RunStore, TaskEventRow, TaskRunRow, TemplateRow, TemplateStore};
use crate::error::Result;
use crate::task::TaskResult;

/// Mutex-guarded maps mirroring the SQLite tables.
#[derive(Default)]
pub struct MemoryStore {
    runs: Mutex<HashMap<String, DagRunRow>>,
    task_runs: Mutex<Vec<TaskRunRow>>,
    events: Mutex<Vec<TaskEventRow>>,
    templates: Mutex<HashMap<String, TemplateRow>>,
    next_id: Mutex<i64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches_run(filter: &QueryFilter, run_id: &str, name: &str, ts: i64) -> bool {
        if let Some(want) = &filter.run_id {
            if want != run_id {
                return false;
            }
        }
        if let Some(want) = &filter.name {
            if !name.contains(want.as_str()) {
                return false;
            }
        }
        if let Some(start) = filter.start_ts_ms {
            if ts < start {
                return false;
            }
        }
        if let Some(end) = filter.end_ts_ms {
            if ts > end {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn insert_run(
        &self,
        run_id: &str,
        name: &str,
        source: &str,
        dag_json: &str,
        workflow_json: &str,
        start_ts_ms: i64,
    ) -> Result<()> {
        let row = DagRunRow {
            run_id: run_id.to_string(),
            name: name.to_string(),
            source: source.to_string(),
            status: 1,
            start_ts_ms,
            dag_json: dag_json.to_string(),
            workflow_json: workflow_json.to_string(),
            ..Default::default()
        };
        self.runs.lock().insert(run_id.to_string(), row);
        Ok(())
    }

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
    ) -> Result<()> {
        if let Some(row) = self.runs.lock().get_mut(run_id) {
            row.status = status;
            row.end_ts_ms = Some(end_ts_ms);
            row.total = total;
            row.success_count = success;
            row.failed_count = failed;
            row.skipped_count = skipped;
            row.message = message.to_string();
        }
        Ok(())
    }

    async fn upsert_task_from_json(&self, run_id: &str, task: &Value) -> Result<()> {
        let mut row = task_row_from_json(run_id, task);
        let mut rows = self.task_runs.lock();
        if let Some(existing) = rows.iter_mut().find(|r| r.run_id == run_id && r.task_id == row.task_id) {
            row.id = existing.id;
            *existing = row;
        } else {
            let mut next = self.next_id.lock();
            *next += 1;
            row.id = *next;
            rows.push(row);
        }
        Ok(())
    }

    async fn mark_task_running(&self, run_id: &str, task_id: &str, ts_ms: i64) -> Result<()> {
        let mut rows = self.task_runs.lock();
        if let Some(r) = rows.iter_mut().find(|r| r.run_id == run_id && r.task_id == task_id) {
            r.status = 1;
            r.start_ts_ms = Some(ts_ms);
        }
        Ok(())
    }

    async fn mark_task_finished(&self, run_id: &str, task_id: &str, result: &TaskResult, ts_ms: i64) -> Result<()> {
        let mut rows = self.task_runs.lock();
        if let Some(r) = rows.iter_mut().find(|r| r.run_id == run_id && r.task_id == task_id) {
            r.status = result.status.as_i32() as i64;
            r.exit_code = result.exit_code as i64;
            r.duration_ms = result.duration_ms;
            r.message = result.message.clone();
            r.stdout = result.stdout.clone();
            r.stderr = result.stderr.clone();
            r.attempt = result.attempt as i64;
            r.max_attempts = result.max_attempts as i64;
            r.end_ts_ms = Some(ts_ms);
            r.worker_id = result.worker_id.clone();
            r.worker_host = result.worker_host.clone();
            r.worker_port = result.worker_port as i64;
        }
        Ok(())
    }

    async fn mark_task_skipped(&self, run_id: &str, task_id: &str, reason: &str, ts_ms: i64) -> Result<()> {
        let mut rows = self.task_runs.lock();
        if let Some(r) = rows.iter_mut().find(|r| r.run_id == run_id && r.task_id == task_id) {
            r.status = 4;
            r.message = reason.to_string();
            r.end_ts_ms = Some(ts_ms);
        }
        Ok(())
    }

    async fn insert_event(
        &self,
        run_id: &str,
        task_id: &str,
        kind: &str,
        event: &str,
        ts_ms: i64,
        payload_json: &str,
    ) -> Result<()> {
        let mut events = self.events.lock();
        let mut next = self.next_id.lock();
        *next += 1;
        events.push(TaskEventRow {
            id: *next,
            run_id: run_id.to_string(),
            task_id: task_id.to_string(),
            kind: kind.to_string(),
            event: event.to_string(),
            ts_ms,
            payload_json: payload_json.to_string(),
        });
        Ok(())
    }

    async fn query_runs(&self, filter: &QueryFilter) -> Result<Vec<DagRunRow>> {
        let runs = self.runs.lock();
        let mut out: Vec<DagRunRow> = runs
            .values()
            .filter(|r| Self::matches_run(filter, &r.run_id, &r.name, r.start_ts_ms))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.start_ts_ms.cmp(&a.start_ts_ms));
        out.truncate(filter.limit.max(1));
        Ok(out)
    }

    async fn query_task_runs(&self, filter: &QueryFilter) -> Result<Vec<TaskRunRow>> {
        let rows = self.task_runs.lock();
        let mut out: Vec<TaskRunRow> = rows
            .iter()
            .filter(|r| Self::matches_run(filter, &r.run_id, &r.name, r.start_ts_ms.unwrap_or(0)))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.id.cmp(&a.id));
        out.truncate(filter.limit.max(1));
        Ok(out)
    }

    async fn query_events(&self, filter: &QueryFilter) -> Result<Vec<TaskEventRow>> {
        let events = self.events.lock();
        let mut out: Vec<TaskEventRow> = events
            .iter()
            .filter(|e| Self::matches_run(filter, &e.run_id, &e.task_id, e.ts_ms))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.id.cmp(&a.id));
        out.truncate(filter.limit.max(1));
        Ok(out)
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn upsert_template(&self, row: &TemplateRow) -> Result<()> {
        self.templates.lock().insert(row.template_id.clone(), row.clone());
        Ok(())
    }

    async fn get_template(&self, template_id: &str) -> Result<Option<TemplateRow>> {
        Ok(self.templates.lock().get(template_id).cloned())
    }

    async fn delete_template(&self, template_id: &str) -> Result<bool> {
        Ok(self.templates.lock().remove(template_id).is_some())
    }

    async fn list_templates(&self) -> Result<Vec<TemplateRow>> {
        let mut rows: Vec<TemplateRow> = self.templates.lock().values().cloned().collect();
        rows.sort_by(|a, b| a.template_id.cmp(&b.template_id));
        Ok(rows)
    }
}
