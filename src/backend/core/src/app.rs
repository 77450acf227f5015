//! Service facade: constructs and wires every component, and exposes the
//! operations the HTTP layer and the CLI depend on.
//!
//! There are no process-wide singletons; tests build fresh facades with
//! mock stores and senders.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::auth::AuthManager;
use crate::config::Config;
use crate::cron::{CronJob, CronScheduler};
use crate::dag::{DagPool, DagResult, DagService};
use crate::error::{ErrorCode, Result, TaskHubError};
use crate::execution::{
    DagStrategy, HttpCallStrategy, HttpSender, LocalStrategy, RemoteStrategy, ShellStrategy, StrategyRegistry,
    TemplateStrategy,
};
use crate::logging::{ConsoleSink, FileSink, FileSinkOptions, LogManager};
use crate::runner::{register_builtin_tasks, CancelToken, LocalTaskRegistry, TaskRunner};
use crate::store::{QueryFilter, RunStore, TemplateStore};
use crate::task::{build_request_json, TaskConfig, TaskExecType, TaskResult};
use crate::template::TemplateService;
use crate::worker::{HeartbeatClient, HeartbeatSettings, WorkerRegistry};
use crate::ws::{WsHub, WsLogStreamer};

/// Sweep cadence for the dead-worker sweeper.
const WORKER_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// The assembled TaskHub service.
pub struct TaskHub {
    pub config: Config,
    pub run_store: Arc<dyn RunStore>,
    pub log: Arc<LogManager>,
    pub hub: Arc<WsHub>,
    pub streamer: Arc<WsLogStreamer>,
    pub locals: Arc<LocalTaskRegistry>,
    pub runner: Arc<TaskRunner>,
    pub pool: Arc<DagPool>,
    pub dags: Arc<DagService>,
    pub templates: Arc<TemplateService>,
    pub cron: Arc<CronScheduler>,
    pub workers: Arc<WorkerRegistry>,
    pub auth: Arc<AuthManager>,

    cancel_flags: DashMap<String, CancelToken>,
    running_tasks: Arc<AtomicU32>,
    heartbeat: parking_lot::Mutex<Option<Arc<HeartbeatClient>>>,
}

impl TaskHub {
    pub fn new(
        config: Config,
        run_store: Arc<dyn RunStore>,
        template_store: Arc<dyn TemplateStore>,
        sender: Arc<dyn HttpSender>,
    ) -> Arc<Self> {
        let log = Arc::new(LogManager::new(config.log.max_records));
        log.add_sink(Arc::new(ConsoleSink));
        if !config.log.path.is_empty() {
            log.add_sink(Arc::new(FileSink::new(FileSinkOptions {
                path: config.log.path.clone().into(),
                rotate_bytes: config.log.rotate_bytes,
                max_files: config.log.max_files,
                flush_each_line: true,
            })));
        }

        let hub = Arc::new(WsHub::new());
        let streamer = Arc::new(WsLogStreamer::new(Arc::clone(&hub)));
        log.add_observer(streamer.clone());

        let locals = Arc::new(LocalTaskRegistry::new());
        register_builtin_tasks(&locals);

        let registry = Arc::new(StrategyRegistry::new());
        let runner = Arc::new(TaskRunner::new(Arc::clone(&registry), Arc::clone(&log), Arc::clone(&streamer)));

        let pool = Arc::new(DagPool::new());
        let dags = Arc::new(DagService::new(
            Arc::clone(&runner),
            Arc::clone(&pool),
            Arc::clone(&run_store),
            Arc::clone(&streamer),
        ));
        let templates = Arc::new(TemplateService::new(template_store));
        let workers = Arc::new(WorkerRegistry::new(&config.worker.select_strategy));
        let cron = Arc::new(CronScheduler::new(Arc::clone(&runner), Arc::clone(&dags), Arc::clone(&templates)));
        let auth = Arc::new(AuthManager::new(
            &config.auth.admin_user,
            &config.auth.admin_password,
            Duration::from_secs(config.auth.token_ttl_secs),
        ));

        // Strategy registration happens after construction: the Dag and
        // Template strategies close the loop back onto the DAG service.
        let shell = Arc::new(ShellStrategy);
        registry.register(TaskExecType::Shell, shell.clone());
        registry.register(TaskExecType::Script, shell);
        registry.register(TaskExecType::HttpCall, Arc::new(HttpCallStrategy));
        registry.register(TaskExecType::Local, Arc::new(LocalStrategy::new(Arc::clone(&locals))));
        let self_worker_id =
            if config.work.is_work && !config.work.worker_id.is_empty() { Some(config.work.worker_id.clone()) } else { None };
        registry.register(
            TaskExecType::Remote,
            Arc::new(RemoteStrategy::new(Arc::clone(&workers), sender, self_worker_id)),
        );
        registry.register(TaskExecType::Dag, Arc::new(DagStrategy::new(Arc::clone(&dags))));
        registry.register(
            TaskExecType::Template,
            Arc::new(TemplateStrategy::new(Arc::clone(&templates), Arc::clone(&dags))),
        );

        Arc::new(Self {
            config,
            run_store,
            log,
            hub,
            streamer,
            locals,
            runner,
            pool,
            dags,
            templates,
            cron,
            workers,
            auth,
            cancel_flags: DashMap::new(),
            running_tasks: Arc::new(AtomicU32::new(0)),
            heartbeat: parking_lot::Mutex::new(None),
        })
    }

    /// Start the background machinery: pool workers, cron loop, worker
    /// sweeper, and (in worker mode) the heartbeat client.
    pub fn start(self: &Arc<Self>) {
        self.pool.start(self.config.dag.num_workers);
        self.cron.start();
        self.workers
            .start_sweeper(WORKER_SWEEP_INTERVAL, Duration::from_secs(self.config.worker.prune_after_secs));

        if self.config.work.is_work {
            let work = &self.config.work;
            let worker_id = if work.worker_id.is_empty() {
                format!("worker-{}", uuid::Uuid::new_v4().simple())
            } else {
                work.worker_id.clone()
            };
            let client = Arc::new(HeartbeatClient::new(
                HeartbeatSettings {
                    master_host: work.master_host.clone(),
                    master_port: work.master_port,
                    worker_id,
                    worker_host: work.worker_host.clone(),
                    worker_port: if work.worker_port != 0 { work.worker_port } else { self.config.server.port },
                    queues: work.queues.clone(),
                    labels: work.labels.clone(),
                    max_running_tasks: work.max_running_tasks,
                    interval: Duration::from_millis(work.heartbeat_interval_ms),
                },
                Arc::clone(&self.running_tasks),
            ));
            client.start();
            *self.heartbeat.lock() = Some(client);
        }
    }

    pub async fn shutdown(&self) {
        let heartbeat = self.heartbeat.lock().take();
        if let Some(h) = heartbeat {
            h.stop().await;
        }
        self.cron.stop().await;
        self.workers.stop_sweeper().await;
        self.pool.stop().await;
        info!("taskhub shutdown complete");
    }

    // ── Facade operations ────────────────────────────────────────────

    /// Run a DAG body synchronously, returning the aggregate result.
    pub async fn run_dag(&self, body: Value, source: &str) -> DagResult {
        self.dags.run_body(body, source, None).await
    }

    /// Start a DAG run in the background; returns `(run_id, task_ids)`.
    pub fn run_dag_async(self: &Arc<Self>, body: Value, source: &str) -> Result<(String, Vec<String>)> {
        let task_ids: Vec<String> = body
            .get("tasks")
            .and_then(Value::as_array)
            .map(|tasks| {
                tasks
                    .iter()
                    .filter_map(|t| t.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .ok_or_else(|| TaskHubError::new(ErrorCode::InvalidParam, "tasks must be an array"))?;

        let run_id = body
            .get("run_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(DagService::new_run_id);

        let dags = Arc::clone(&self.dags);
        let source = source.to_string();
        let spawned_run_id = run_id.clone();
        tokio::spawn(async move {
            let result = dags.run_body(body, &source, Some(&spawned_run_id)).await;
            if !result.success {
                warn!(run = %result.run_id, message = %result.message, "async dag run failed");
            }
        });

        Ok((run_id, task_ids))
    }

    /// Enqueue a single task for background execution; returns its run id.
    /// The task's cancel flag stays registered under the logical id until
    /// the run finishes.
    pub async fn schedule_task(self: &Arc<Self>, mut cfg: TaskConfig) -> Result<String> {
        let run_id = DagService::new_run_id();
        cfg.id.run_id = run_id.clone();

        let body = build_request_json(&cfg);
        self.dags.persist_run_and_tasks(&run_id, &body, "manual").await;

        let token = CancelToken::new();
        self.cancel_flags.insert(cfg.id.value.clone(), token.clone());
        self.streamer.broadcast_envelope("task_created", json!({ "id": cfg.id.value, "run_id": run_id }));

        let hub = Arc::clone(self);
        let task_run_id = run_id.clone();
        tokio::spawn(async move {
            hub.running_tasks.fetch_add(1, Ordering::AcqRel);
            let _ = hub.run_store.mark_task_running(&task_run_id, &cfg.id.value, Utc::now().timestamp_millis()).await;

            let result = hub.runner.run(&cfg, Some(token)).await;

            let _ = hub
                .run_store
                .mark_task_finished(&task_run_id, &cfg.id.value, &result, Utc::now().timestamp_millis())
                .await;
            let (ok, failed) = if result.ok() { (1, 0) } else { (0, 1) };
            let _ = hub
                .run_store
                .finish_run(
                    &task_run_id,
                    result.status.as_i32() as i64,
                    Utc::now().timestamp_millis(),
                    1,
                    ok,
                    failed,
                    0,
                    &result.message,
                )
                .await;

            hub.running_tasks.fetch_sub(1, Ordering::AcqRel);
            hub.cancel_flags.remove(&cfg.id.value);
            hub.streamer.broadcast_envelope(
                "task_updated",
                json!({ "id": cfg.id.value, "run_id": task_run_id, "status": result.status.as_i32() }),
            );
        });

        Ok(run_id)
    }

    /// Flip the cancel flag of a running manual task.
    pub fn cancel_task(&self, task_id: &str) -> Result<()> {
        match self.cancel_flags.get(task_id) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(TaskHubError::new(ErrorCode::TaskAlreadyFinished, "task not running")),
        }
    }

    pub async fn register_template(&self, body: &Value) -> Result<Value> {
        let tpl = self.templates.register(body).await?;
        Ok(json!({ "template_id": tpl.template_id }))
    }

    pub fn register_cron(&self, body: &Value) -> Result<String> {
        let job = CronJob::from_body(body)?;
        Ok(self.cron.add_job(job))
    }

    /// Execute one task immediately on behalf of a master (worker mode).
    pub async fn execute_for_master(&self, cfg: &TaskConfig) -> Result<TaskResult> {
        if cfg.exec_type == TaskExecType::Remote {
            return Err(TaskHubError::invalid("worker cannot execute Remote task"));
        }
        self.running_tasks.fetch_add(1, Ordering::AcqRel);
        let result = self.runner.run(cfg, None).await;
        self.running_tasks.fetch_sub(1, Ordering::AcqRel);
        Ok(result)
    }

    pub async fn query_task_runs(&self, filter: &QueryFilter) -> Result<Vec<crate::store::TaskRunRow>> {
        self.run_store.query_task_runs(filter).await
    }
}
