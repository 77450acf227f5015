//! The task runner: timeout, retry with backoff, cancellation, and
//! lifecycle events around every execution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::json;
use tracing::{info, warn};

use super::context::{CancelToken, ExecutionContext};
use crate::execution::StrategyRegistry;
use crate::logging::{LogLevel, LogManager, LogRecord, LogStream};
use crate::task::{TaskConfig, TaskResult, TaskStatus};
use crate::ws::WsLogStreamer;

/// Cancel-responsive sleep slice used during retry backoff.
const BACKOFF_SLICE: Duration = Duration::from_millis(50);

/// Wraps a strategy with retry, timeout, cancellation, and observability.
/// One instance serves the whole process; per-run state lives on the
/// stack.
pub struct TaskRunner {
    registry: Arc<StrategyRegistry>,
    log: Arc<LogManager>,
    streamer: Arc<WsLogStreamer>,
}

impl TaskRunner {
    pub fn new(registry: Arc<StrategyRegistry>, log: Arc<LogManager>, streamer: Arc<WsLogStreamer>) -> Self {
        Self { registry, log, streamer }
    }

    pub fn registry(&self) -> &Arc<StrategyRegistry> {
        &self.registry
    }

    /// Run a task to a terminal result. Never returns a non-result
    /// failure: panics and strategy errors become `Failed`.
    pub async fn run(&self, cfg: &TaskConfig, cancel: Option<CancelToken>) -> TaskResult {
        info!(task = %cfg.id, exec_type = cfg.exec_type.as_str(), "task run start");
        let run_start = Instant::now();

        self.log.emit_event(&cfg.id, LogLevel::Info, format!("task start, exec_type={}", cfg.exec_type.as_str()));
        self.streamer.push_task_event(
            &cfg.id.value,
            "task_start",
            json!({ "exec_type": cfg.exec_type.as_str(), "queue": cfg.queue, "run_id": cfg.id.run_id }),
            &cfg.id.run_id,
        );

        let mut result = self.run_with_retry(cfg, cancel).await;

        // Fall back to the wall clock of the whole run when the strategy
        // did not report a duration.
        if result.duration_ms <= 0 {
            result.duration_ms = run_start.elapsed().as_millis() as i64;
        }

        let mut rec = LogRecord::event(
            cfg.id.clone(),
            if result.ok() { LogLevel::Info } else { LogLevel::Warn },
            "task end",
        );
        rec.stream = LogStream::Event;
        rec.dag_run_id = cfg.id.run_id.clone();
        rec.duration_ms = result.duration_ms;
        rec.attempt = result.attempt;
        rec.fields.insert("status".into(), result.status.as_i32().to_string());
        rec.fields.insert("message".into(), result.message.clone());
        rec.fields.insert("exit_code".into(), result.exit_code.to_string());
        rec.fields.insert("max_attempts".into(), result.max_attempts.to_string());
        rec.fields.insert("stdout_bytes".into(), result.stdout.len().to_string());
        rec.fields.insert("stderr_bytes".into(), result.stderr.len().to_string());
        if !result.worker_id.is_empty() {
            rec.fields.insert("worker_id".into(), result.worker_id.clone());
        }
        self.log.emit(rec);

        self.streamer.push_task_event(
            &cfg.id.value,
            "task_end",
            json!({
                "status": result.status.as_str(),
                "message": result.message,
                "duration_ms": result.duration_ms,
                "attempt": result.attempt,
                "max_attempts": result.max_attempts,
                "run_id": cfg.id.run_id,
            }),
            &cfg.id.run_id,
        );
        result
    }

    async fn run_with_retry(&self, cfg: &TaskConfig, cancel: Option<CancelToken>) -> TaskResult {
        // A missing strategy is a configuration problem; retrying cannot
        // fix it.
        if !self.registry.has(cfg.exec_type) {
            return TaskResult::failed(format!("no strategy for exec type {}", cfg.exec_type.as_str()));
        }

        let max_attempts = cfg.retry_count.saturating_add(1).max(1);
        let base_delay = if cfg.retry_delay.is_zero() { Duration::from_millis(1000) } else { cfg.retry_delay };
        let mut last = TaskResult::default();

        for attempt in 1..=max_attempts {
            if let Some(token) = &cancel {
                if token.is_canceled() {
                    let mut r = TaskResult::canceled("canceled before attempt");
                    r.attempt = attempt;
                    r.max_attempts = max_attempts;
                    return r;
                }
            }

            let deadline = if cfg.has_timeout() { Some(Instant::now() + cfg.timeout) } else { None };

            self.log.emit_event(&cfg.id, LogLevel::Info, format!("attempt start {attempt}/{max_attempts}"));
            self.streamer.push_task_event(
                &cfg.id.value,
                "attempt_start",
                json!({ "attempt": attempt, "max_attempts": max_attempts, "run_id": cfg.id.run_id }),
                &cfg.id.run_id,
            );

            last = self.run_one_attempt(cfg, cancel.clone(), deadline).await;
            last.attempt = attempt;
            last.max_attempts = max_attempts;

            self.log.emit_event(
                &cfg.id,
                if last.ok() { LogLevel::Info } else { LogLevel::Warn },
                format!("attempt end {attempt}/{max_attempts}, status={}, message={}", last.status.as_str(), last.message),
            );
            self.streamer.push_task_event(
                &cfg.id.value,
                "attempt_end",
                json!({
                    "attempt": attempt,
                    "status": last.status.as_str(),
                    "message": last.message,
                    "run_id": cfg.id.run_id,
                }),
                &cfg.id.run_id,
            );

            if last.ok() {
                return last;
            }
            // Cancel and timeout are terminal; retrying them would ignore
            // the caller's intent or the deadline.
            if matches!(last.status, TaskStatus::Canceled | TaskStatus::Timeout) {
                return last;
            }
            // Strategies flag structurally hopeless failures (e.g. nesting
            // depth exceeded) as non-retryable.
            if last.metadata.get("retryable").map(String::as_str) == Some("false") {
                return last;
            }
            if attempt >= max_attempts {
                break;
            }

            let mut delay = base_delay;
            if cfg.retry_exp_backoff {
                delay = base_delay.saturating_mul(1u32 << (attempt - 1).min(16));
            }
            self.log.emit_event(&cfg.id, LogLevel::Info, format!("retry backoff {}ms", delay.as_millis()));

            let sleep_until = Instant::now() + delay;
            while Instant::now() < sleep_until {
                if let Some(token) = &cancel {
                    if token.is_canceled() {
                        let mut r = TaskResult::canceled("canceled during retry backoff");
                        r.attempt = attempt;
                        r.max_attempts = max_attempts;
                        return r;
                    }
                }
                let remaining = sleep_until.saturating_duration_since(Instant::now());
                tokio::time::sleep(remaining.min(BACKOFF_SLICE)).await;
            }
        }

        last
    }

    async fn run_one_attempt(
        &self,
        cfg: &TaskConfig,
        external_cancel: Option<CancelToken>,
        deadline: Option<Instant>,
    ) -> TaskResult {
        // A non-cancelable task still gets an internal token so strategies
        // can rely on one existing.
        let token = match (&external_cancel, cfg.cancelable) {
            (Some(t), true) => t.clone(),
            _ => CancelToken::new(),
        };

        if let Some(d) = deadline {
            if Instant::now() >= d {
                token.cancel();
                return TaskResult::timeout("timeout before execution");
            }
        }

        let ctx = ExecutionContext::new(cfg, token.clone(), deadline);
        let strategy = match self.registry.get(cfg.exec_type) {
            Some(s) => s,
            None => return TaskResult::failed(format!("no strategy for exec type {}", cfg.exec_type.as_str())),
        };

        let mut result = match std::panic::AssertUnwindSafe(strategy.execute(&ctx)).catch_unwind().await {
            Ok(r) => r,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(task = %cfg.id, panic = %msg, "strategy panicked");
                TaskResult::failed(format!("exception: {msg}"))
            }
        };

        // A strategy may have finished right as the flag flipped; the
        // caller's cancel wins over a late success.
        if token.is_canceled() && result.status == TaskStatus::Success {
            result = TaskResult::canceled("canceled");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionStrategy;
    use crate::task::TaskExecType;
    use crate::ws::WsHub;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn runner_with(strategy: Arc<dyn ExecutionStrategy>) -> TaskRunner {
        let registry = Arc::new(StrategyRegistry::new());
        registry.register(TaskExecType::Local, strategy);
        let hub = Arc::new(WsHub::new());
        TaskRunner::new(registry, Arc::new(LogManager::new(100)), Arc::new(WsLogStreamer::new(hub)))
    }

    struct FailNTimes {
        failures: AtomicU32,
    }

    #[async_trait]
    impl ExecutionStrategy for FailNTimes {
        async fn execute(&self, _ctx: &ExecutionContext<'_>) -> TaskResult {
            if self.failures.fetch_sub(1, Ordering::SeqCst) > 0 {
                TaskResult::failed("flaky")
            } else {
                TaskResult::success("finally")
            }
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let runner = runner_with(Arc::new(FailNTimes { failures: AtomicU32::new(2) }));
        let mut cfg = TaskConfig::new("t");
        cfg.retry_count = 3;
        cfg.retry_delay = Duration::from_millis(1);

        let r = runner.run(&cfg, None).await;
        assert!(r.ok());
        assert_eq!(r.attempt, 3);
        assert_eq!(r.max_attempts, 4);
    }

    struct AlwaysTimeout;

    #[async_trait]
    impl ExecutionStrategy for AlwaysTimeout {
        async fn execute(&self, ctx: &ExecutionContext<'_>) -> TaskResult {
            ctx.timeout("slept past deadline")
        }
    }

    #[tokio::test]
    async fn timeout_is_not_retried() {
        let runner = runner_with(Arc::new(AlwaysTimeout));
        let mut cfg = TaskConfig::new("t");
        cfg.retry_count = 5;
        cfg.retry_delay = Duration::from_millis(1);

        let r = runner.run(&cfg, None).await;
        assert_eq!(r.status, TaskStatus::Timeout);
        assert_eq!(r.attempt, 1);
    }

    struct Panics;

    #[async_trait]
    impl ExecutionStrategy for Panics {
        async fn execute(&self, _ctx: &ExecutionContext<'_>) -> TaskResult {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn panic_becomes_failed_result() {
        let runner = runner_with(Arc::new(Panics));
        let cfg = TaskConfig::new("t");
        let r = runner.run(&cfg, None).await;
        assert_eq!(r.status, TaskStatus::Failed);
        assert!(r.message.contains("exception"));
    }

    #[tokio::test]
    async fn missing_strategy_fails_without_retry() {
        let runner = runner_with(Arc::new(AlwaysTimeout));
        let mut cfg = TaskConfig::new("t");
        cfg.exec_type = TaskExecType::Shell; // not registered
        cfg.retry_count = 4;

        let r = runner.run(&cfg, None).await;
        assert_eq!(r.status, TaskStatus::Failed);
        assert!(r.message.contains("no strategy"));
    }

    #[tokio::test]
    async fn cancel_before_run_short_circuits() {
        let runner = runner_with(Arc::new(AlwaysTimeout));
        let cfg = TaskConfig::new("t");
        let token = CancelToken::new();
        token.cancel();

        let r = runner.run(&cfg, Some(token)).await;
        assert_eq!(r.status, TaskStatus::Canceled);
    }
}
