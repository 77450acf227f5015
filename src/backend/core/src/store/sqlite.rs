//! SQLite-backed store.
//!
//! The pool is capped at one connection: SQLite is a single-writer engine,
//! so serializing every store call through the pool keeps writers from
//! tripping over each other.

use std::str::FromStr;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use super::{task_row_from_json, DagRunRow, QueryFilter, RunStore, TaskEventRow, TaskRunRow, TemplateRow, TemplateStore};
use crate::error::Result;
use crate::task::TaskResult;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) and apply the embedded migrations.
    pub async fn open(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{db_path}"))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| crate::error::TaskHubError::from(sqlx::Error::from(e)))?;

        info!(db_path, "sqlite store opened");
        Ok(Self { pool })
    }

    /// Apply migrations from an external directory instead of the embedded
    /// set (`database.migrations_dir`).
    pub async fn open_with_migrations_dir(db_path: &str, migrations_dir: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{db_path}"))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;

        let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(migrations_dir))
            .await
            .map_err(|e| crate::error::TaskHubError::from(sqlx::Error::from(e)))?;
        migrator.run(&pool).await.map_err(|e| crate::error::TaskHubError::from(sqlx::Error::from(e)))?;

        info!(db_path, migrations_dir, "sqlite store opened");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn clamp_limit(limit: usize) -> i64 {
    limit.clamp(1, 1000) as i64
}

#[async_trait]
impl RunStore for SqliteStore {
    async fn insert_run(
        &self,
        run_id: &str,
        name: &str,
        source: &str,
        dag_json: &str,
        workflow_json: &str,
        start_ts_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dag_run (run_id, name, source, status, start_ts_ms, dag_json, workflow_json)
            VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6)
            ON CONFLICT(run_id) DO UPDATE SET
                name = excluded.name,
                source = excluded.source,
                dag_json = excluded.dag_json,
                workflow_json = excluded.workflow_json
            "#,
        )
        .bind(run_id)
        .bind(name)
        .bind(source)
        .bind(start_ts_ms)
        .bind(dag_json)
        .bind(workflow_json)
        .execute(&self.pool)
        .await?;
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
        sqlx::query(
            r#"
            UPDATE dag_run
            SET status = ?2, end_ts_ms = ?3, total = ?4,
                success_count = ?5, failed_count = ?6, skipped_count = ?7, message = ?8
            WHERE run_id = ?1
            "#,
        )
        .bind(run_id)
        .bind(status)
        .bind(end_ts_ms)
        .bind(total)
        .bind(success)
        .bind(failed)
        .bind(skipped)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_task_from_json(&self, run_id: &str, task: &Value) -> Result<()> {
        let row = task_row_from_json(run_id, task);
        sqlx::query(
            r#"
            INSERT INTO task_run (run_id, task_id, name, exec_type, exec_command, exec_params_json, deps_json, metadata_json, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)
            ON CONFLICT(run_id, task_id) DO UPDATE SET
                name = excluded.name,
                exec_type = excluded.exec_type,
                exec_command = excluded.exec_command,
                exec_params_json = excluded.exec_params_json,
                deps_json = excluded.deps_json,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(&row.run_id)
        .bind(&row.task_id)
        .bind(&row.name)
        .bind(&row.exec_type)
        .bind(&row.exec_command)
        .bind(&row.exec_params_json)
        .bind(&row.deps_json)
        .bind(&row.metadata_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_task_running(&self, run_id: &str, task_id: &str, ts_ms: i64) -> Result<()> {
        sqlx::query("UPDATE task_run SET status = 1, start_ts_ms = ?3 WHERE run_id = ?1 AND task_id = ?2")
            .bind(run_id)
            .bind(task_id)
            .bind(ts_ms)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_task_finished(&self, run_id: &str, task_id: &str, result: &TaskResult, ts_ms: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE task_run
            SET status = ?3, exit_code = ?4, duration_ms = ?5, message = ?6,
                stdout = ?7, stderr = ?8, attempt = ?9, max_attempts = ?10,
                end_ts_ms = ?11, worker_id = ?12, worker_host = ?13, worker_port = ?14
            WHERE run_id = ?1 AND task_id = ?2
            "#,
        )
        .bind(run_id)
        .bind(task_id)
        .bind(result.status.as_i32() as i64)
        .bind(result.exit_code as i64)
        .bind(result.duration_ms)
        .bind(&result.message)
        .bind(&result.stdout)
        .bind(&result.stderr)
        .bind(result.attempt as i64)
        .bind(result.max_attempts as i64)
        .bind(ts_ms)
        .bind(&result.worker_id)
        .bind(&result.worker_host)
        .bind(result.worker_port as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_task_skipped(&self, run_id: &str, task_id: &str, reason: &str, ts_ms: i64) -> Result<()> {
        sqlx::query("UPDATE task_run SET status = 4, message = ?3, end_ts_ms = ?4 WHERE run_id = ?1 AND task_id = ?2")
            .bind(run_id)
            .bind(task_id)
            .bind(reason)
            .bind(ts_ms)
            .execute(&self.pool)
            .await?;
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
        sqlx::query(
            "INSERT INTO task_event (run_id, task_id, kind, event, ts_ms, payload_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(run_id)
        .bind(task_id)
        .bind(kind)
        .bind(event)
        .bind(ts_ms)
        .bind(payload_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query_runs(&self, filter: &QueryFilter) -> Result<Vec<DagRunRow>> {
        let rows = sqlx::query_as::<_, DagRunRow>(
            r#"
            SELECT run_id, name, source, status, start_ts_ms, end_ts_ms, total,
                   success_count, failed_count, skipped_count, message, dag_json, workflow_json
            FROM dag_run
            WHERE (?1 IS NULL OR run_id = ?1)
              AND (?2 IS NULL OR name LIKE '%' || ?2 || '%')
              AND (?3 IS NULL OR start_ts_ms >= ?3)
              AND (?4 IS NULL OR start_ts_ms <= ?4)
            ORDER BY start_ts_ms DESC
            LIMIT ?5
            "#,
        )
        .bind(&filter.run_id)
        .bind(&filter.name)
        .bind(filter.start_ts_ms)
        .bind(filter.end_ts_ms)
        .bind(clamp_limit(filter.limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn query_task_runs(&self, filter: &QueryFilter) -> Result<Vec<TaskRunRow>> {
        let rows = sqlx::query_as::<_, TaskRunRow>(
            r#"
            SELECT id, run_id, task_id, name, exec_type, exec_command, exec_params_json,
                   deps_json, status, exit_code, duration_ms, message, stdout, stderr,
                   attempt, max_attempts, start_ts_ms, end_ts_ms,
                   worker_id, worker_host, worker_port, metadata_json
            FROM task_run
            WHERE (?1 IS NULL OR run_id = ?1)
              AND (?2 IS NULL OR name LIKE '%' || ?2 || '%')
              AND (?3 IS NULL OR start_ts_ms >= ?3)
              AND (?4 IS NULL OR start_ts_ms <= ?4)
            ORDER BY id DESC
            LIMIT ?5
            "#,
        )
        .bind(&filter.run_id)
        .bind(&filter.name)
        .bind(filter.start_ts_ms)
        .bind(filter.end_ts_ms)
        .bind(clamp_limit(filter.limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn query_events(&self, filter: &QueryFilter) -> Result<Vec<TaskEventRow>> {
        let rows = sqlx::query_as::<_, TaskEventRow>(
            r#"
            SELECT id, run_id, task_id, kind, event, ts_ms, payload_json
            FROM task_event
            WHERE (?1 IS NULL OR run_id = ?1)
              AND (?2 IS NULL OR ts_ms >= ?2)
              AND (?3 IS NULL OR ts_ms <= ?3)
            ORDER BY id DESC
            LIMIT ?4
            "#,
        )
        .bind(&filter.run_id)
        .bind(filter.start_ts_ms)
        .bind(filter.end_ts_ms)
        .bind(clamp_limit(filter.limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl TemplateStore for SqliteStore {
    async fn upsert_template(&self, row: &TemplateRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO task_template (template_id, name, description, task_json_template, schema_json, created_ts_ms, updated_ts_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(template_id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                task_json_template = excluded.task_json_template,
                schema_json = excluded.schema_json,
                updated_ts_ms = excluded.updated_ts_ms
            "#,
        )
        .bind(&row.template_id)
        .bind(&row.name)
        .bind(&row.description)
        .bind(&row.task_json_template)
        .bind(&row.schema_json)
        .bind(row.created_ts_ms)
        .bind(row.updated_ts_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_template(&self, template_id: &str) -> Result<Option<TemplateRow>> {
        let row = sqlx::query_as::<_, TemplateRow>(
            "SELECT template_id, name, description, task_json_template, schema_json, created_ts_ms, updated_ts_ms FROM task_template WHERE template_id = ?1",
        )
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_template(&self, template_id: &str) -> Result<bool> {
        let done = sqlx::query("DELETE FROM task_template WHERE template_id = ?1")
            .bind(template_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected() > 0)
    }

    async fn list_templates(&self) -> Result<Vec<TemplateRow>> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            "SELECT template_id, name, description, task_json_template, schema_json, created_ts_ms, updated_ts_ms FROM task_template ORDER BY template_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let store = SqliteStore::open(path.to_str().unwrap()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn run_and_task_round_trip() {
        let (_dir, store) = open_temp().await;
        store.insert_run("r1", "wf", "manual", "{}", "", 100).await.unwrap();
        store.upsert_task_from_json("r1", &json!({"id": "a", "exec_type": "Shell", "deps": ["b"]})).await.unwrap();
        store.mark_task_running("r1", "a", 101).await.unwrap();

        let mut result = TaskResult::success("done");
        result.duration_ms = 7;
        store.mark_task_finished("r1", "a", &result, 108).await.unwrap();
        store.finish_run("r1", 2, 110, 1, 1, 0, 0, "").await.unwrap();

        let filter = QueryFilter { run_id: Some("r1".into()), limit: 10, ..Default::default() };
        let runs = store.query_runs(&filter).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, 2);
        assert_eq!(runs[0].end_ts_ms, Some(110));

        let tasks = store.query_task_runs(&filter).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].duration_ms, 7);
        assert_eq!(tasks[0].deps_json, r#"["b"]"#);
    }

    #[tokio::test]
    async fn template_crud() {
        let (_dir, store) = open_temp().await;
        let row = TemplateRow {
            template_id: "tpl-1".into(),
            name: "demo".into(),
            task_json_template: r#"{"task":{"id":"t"}}"#.into(),
            schema_json: "[]".into(),
            ..Default::default()
        };
        store.upsert_template(&row).await.unwrap();
        assert!(store.get_template("tpl-1").await.unwrap().is_some());
        assert_eq!(store.list_templates().await.unwrap().len(), 1);
        assert!(store.delete_template("tpl-1").await.unwrap());
        assert!(store.get_template("tpl-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn time_window_filter() {
        let (_dir, store) = open_temp().await;
        store.insert_run("old", "a", "manual", "{}", "", 100).await.unwrap();
        store.insert_run("new", "a", "manual", "{}", "", 2000).await.unwrap();

        let filter = QueryFilter { start_ts_ms: Some(1000), limit: 10, ..Default::default() };
        let runs = store.query_runs(&filter).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "new");
    }
}
