//! Remote execution: pick a worker, push the task to it, parse the result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::ExecutionStrategy;
use crate::runner::ExecutionContext;
use crate::task::{build_request_json, parse_task_result, TaskExecType, TaskResult};
use crate::worker::WorkerRegistry;

/// Cooldown applied to a worker after a failed dispatch.
const DISPATCH_COOLDOWN: Duration = Duration::from_secs(10);

/// Dispatch timeout when the task carries no deadline.
const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimal outbound HTTP contract: POST a JSON body, get status + body
/// back. Production uses [`ReqwestSender`]; tests substitute mocks.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn post_json(&self, url: &str, body: &Value, timeout: Duration) -> std::io::Result<(u16, Value)>;
}

/// [`HttpSender`] backed by reqwest.
pub struct ReqwestSender;

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn post_json(&self, url: &str, body: &Value, timeout: Duration) -> std::io::Result<(u16, Value)> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let resp = client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e))?;
        let status = resp.status().as_u16();
        let body = resp.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, body))
    }
}

/// Pushes a task to a selected worker's `/api/worker/execute` endpoint.
pub struct RemoteStrategy {
    registry: Arc<WorkerRegistry>,
    sender: Arc<dyn HttpSender>,
    /// This node's own worker id when running in worker mode; never
    /// dispatch to ourselves.
    self_worker_id: Option<String>,
}

impl RemoteStrategy {
    pub fn new(registry: Arc<WorkerRegistry>, sender: Arc<dyn HttpSender>, self_worker_id: Option<String>) -> Self {
        Self { registry, sender, self_worker_id }
    }

    /// The pushed task must carry a concrete exec type the worker can run;
    /// `inner_exec_type` overrides, defaulting to Shell.
    fn inner_config(ctx: &ExecutionContext<'_>) -> crate::task::TaskConfig {
        let mut inner = ctx.cfg.clone();
        let inner_type = ctx.get("inner_exec_type", "Shell");
        inner.exec_type = TaskExecType::parse(&inner_type);
        inner.exec_params.remove("inner_exec_type");
        inner
    }
}

#[async_trait]
impl ExecutionStrategy for RemoteStrategy {
    async fn execute(&self, ctx: &ExecutionContext<'_>) -> TaskResult {
        let cfg = ctx.cfg;
        let start = Instant::now();

        if ctx.is_canceled() {
            return ctx.canceled("canceled before remote dispatch");
        }
        if ctx.is_timeout() {
            return ctx.timeout("timeout before remote dispatch");
        }

        let Some(worker) = self.registry.pick_for_queue(&cfg.queue, self.self_worker_id.as_deref()) else {
            let mut r = ctx.fail("no worker");
            r.metadata.insert("retryable".into(), "true".into());
            return r;
        };

        let url = format!("http://{}:{}/api/worker/execute", worker.host, worker.port);
        let body = build_request_json(&Self::inner_config(ctx));
        let timeout = ctx.remaining().unwrap_or(DEFAULT_DISPATCH_TIMEOUT);

        info!(task = %cfg.id, worker = %worker.id, url = %url, "remote dispatch");
        let mut r = match self.sender.post_json(&url, &body, timeout).await {
            Ok((status, resp)) if (200..300).contains(&status) => parse_task_result(&resp),
            Ok((status, _)) => {
                if status >= 500 {
                    self.registry.mark_dispatch_failure(&worker.id, DISPATCH_COOLDOWN);
                }
                let mut r = ctx.fail(format!("worker returned http {status}"));
                r.metadata.insert("retryable".into(), "true".into());
                r
            }
            Err(e) => {
                warn!(task = %cfg.id, worker = %worker.id, error = %e, "remote dispatch failed");
                self.registry.mark_dispatch_failure(&worker.id, DISPATCH_COOLDOWN);
                let mut r = if ctx.is_timeout() {
                    ctx.timeout("remote dispatch timed out")
                } else {
                    ctx.fail(format!("remote dispatch error: {e}"))
                };
                r.metadata.insert("retryable".into(), "true".into());
                r
            }
        };

        r.worker_id = worker.id;
        r.worker_host = worker.host;
        r.worker_port = worker.port;
        if r.duration_ms <= 0 {
            r.duration_ms = start.elapsed().as_millis() as i64;
        }
        r
    }
}
