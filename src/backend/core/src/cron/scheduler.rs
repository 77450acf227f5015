//! Single-loop cron dispatcher.
//!
//! The loop scans for due jobs under the lock, advances each due job's
//! `next_time` before releasing it, then dispatches copies outside the
//! lock. Missed ticks collapse: `next()` is computed from the current
//! time, so a paused process fires once and then realigns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{CronJob, CronPayload};
use crate::dag::DagService;
use crate::error::Result;
use crate::runner::TaskRunner;
use crate::task::TaskConfig;
use crate::template::TemplateService;

pub struct CronScheduler {
    jobs: Mutex<Vec<CronJob>>,
    wake: Notify,
    stopping: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
    runner: Arc<TaskRunner>,
    dags: Arc<DagService>,
    templates: Arc<TemplateService>,
}

impl CronScheduler {
    pub fn new(runner: Arc<TaskRunner>, dags: Arc<DagService>, templates: Arc<TemplateService>) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            wake: Notify::new(),
            stopping: AtomicBool::new(false),
            handle: Mutex::new(None),
            runner,
            dags,
            templates,
        }
    }

    pub fn add_job(&self, job: CronJob) -> String {
        let id = job.id.clone();
        info!(job = %id, spec = %job.spec, "cron job added");
        self.jobs.lock().push(job);
        self.wake.notify_waiters();
        id
    }

    pub fn remove_job(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|j| j.id != job_id);
        let removed = jobs.len() != before;
        drop(jobs);
        if removed {
            info!(job = %job_id, "cron job removed");
            self.wake.notify_waiters();
        }
        removed
    }

    pub fn list_jobs(&self) -> Vec<Value> {
        self.jobs.lock().iter().map(CronJob::to_json).collect()
    }

    /// Under the lock: collect copies of every enabled job with
    /// `next_time <= now`, advancing each one's `next_time` past `now`
    /// before release so a slow dispatch can never double-fire. Also
    /// returns the nearest upcoming `next_time`.
    fn collect_due(&self, now: DateTime<Local>) -> (Vec<CronJob>, Option<DateTime<Local>>) {
        let mut jobs = self.jobs.lock();
        let mut due = Vec::new();
        let mut nearest: Option<DateTime<Local>> = None;

        for job in jobs.iter_mut() {
            if !job.enabled {
                continue;
            }
            if job.next_time <= now {
                match job.expr.next(now) {
                    Ok(next) => {
                        let copy = job.clone();
                        job.next_time = next;
                        due.push(copy);
                    }
                    Err(e) => {
                        error!(job = %job.id, error = %e, "cron next-time computation failed; disabling");
                        job.enabled = false;
                        continue;
                    }
                }
            }
            if nearest.map(|n| job.next_time < n).unwrap_or(true) {
                nearest = Some(job.next_time);
            }
        }
        (due, nearest)
    }

    fn run_tag() -> String {
        let tag = Uuid::new_v4().simple().to_string();
        format!("{}_{}", Utc::now().timestamp_millis(), &tag[..6])
    }

    async fn dispatch(
        runner: Arc<TaskRunner>,
        dags: Arc<DagService>,
        templates: Arc<TemplateService>,
        job: CronJob,
    ) -> Result<bool> {
        let run_id = format!("cron_{}_{}", job.id, Self::run_tag());

        match job.payload {
            CronPayload::SingleTask(cfg) => {
                let mut cfg: TaskConfig = cfg;
                cfg.id.run_id = run_id;
                let r = runner.run(&cfg, None).await;
                info!(job = %job.id, task = %cfg.id, status = r.status.as_str(), "cron single task finished");
                Ok(r.ok())
            }
            CronPayload::Dag { body } => {
                let mut body = body;
                if !body.get("config").map(Value::is_object).unwrap_or(false) {
                    body["config"] = Value::Object(Default::default());
                }
                body["config"]["cron_job_id"] = Value::String(job.id.clone());
                if body.get("name").is_none() && !job.name.is_empty() {
                    body["name"] = Value::String(job.name.clone());
                }
                let result = dags.run_body(body, "cron", Some(&run_id)).await;
                info!(job = %job.id, run = %result.run_id, success = result.success, "cron dag finished");
                Ok(result.success)
            }
            CronPayload::Template { template_id, params } => {
                let mut rendered = templates.render_by_id(&template_id, &params).await?;
                if !rendered.get("config").map(Value::is_object).unwrap_or(false) {
                    rendered["config"] = Value::Object(Default::default());
                }
                rendered["config"]["template_id"] = Value::String(template_id);
                rendered["config"]["cron_job_id"] = Value::String(job.id.clone());
                if rendered.get("name").is_none() && !job.name.is_empty() {
                    rendered["name"] = Value::String(job.name.clone());
                }
                let result = dags.run_body(rendered, "cron", Some(&run_id)).await;
                info!(job = %job.id, run = %result.run_id, success = result.success, "cron template finished");
                Ok(result.success)
            }
        }
    }

    pub fn start(self: &Arc<Self>) {
        let mut guard = self.handle.lock();
        if guard.is_some() {
            return;
        }
        self.stopping.store(false, Ordering::Release);

        let scheduler = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            info!("cron scheduler started");
            loop {
                if scheduler.stopping.load(Ordering::Acquire) {
                    break;
                }

                let now = Local::now();
                let (due, nearest) = scheduler.collect_due(now);

                if !due.is_empty() {
                    for job in due {
                        // Fire-and-forget: the loop only guarantees the
                        // dispatch was submitted before the job can fire
                        // again.
                        let runner = Arc::clone(&scheduler.runner);
                        let dags = Arc::clone(&scheduler.dags);
                        let templates = Arc::clone(&scheduler.templates);
                        let job_id = job.id.clone();
                        tokio::spawn(async move {
                            if let Err(e) = Self::dispatch(runner, dags, templates, job).await {
                                warn!(job = %job_id, error = %e, "cron dispatch failed");
                            }
                        });
                    }
                    continue;
                }

                let notified = scheduler.wake.notified();
                match nearest {
                    Some(next) => {
                        let wait = (next - Local::now()).to_std().unwrap_or_default();
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {}
                            _ = notified => {}
                        }
                    }
                    None => notified.await,
                }
            }
            info!("cron scheduler stopped");
        }));
    }

    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        self.wake.notify_waiters();
        let handle = self.handle.lock().take();
        if let Some(h) = handle {
            let _ = h.await;
        }
    }
}
