//! In-process task execution.
//!
//! The handler runs on a blocking thread while a watchdog polls the cancel
//! flag and the deadline every 20 ms, flipping the cooperative cancel flag
//! the handler is expected to observe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::info;

use super::ExecutionStrategy;
use crate::runner::{ExecutionContext, LocalTaskRegistry};
use crate::task::{TaskResult, TaskStatus};

const WATCHDOG_INTERVAL: Duration = Duration::from_millis(20);

pub struct LocalStrategy {
    registry: Arc<LocalTaskRegistry>,
}

impl LocalStrategy {
    pub fn new(registry: Arc<LocalTaskRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ExecutionStrategy for LocalStrategy {
    async fn execute(&self, ctx: &ExecutionContext<'_>) -> TaskResult {
        let cfg = ctx.cfg;
        let start = Instant::now();

        let fallback = if !cfg.exec_command.is_empty() { cfg.exec_command.clone() } else { cfg.id.value.clone() };
        let key = ctx.get("handler", &fallback);
        if key.is_empty() {
            return ctx.fail("empty local task id");
        }

        let Some(handler) = self.registry.find(&key) else {
            return ctx.fail(format!("local task not found: {key}"));
        };

        if ctx.is_canceled() {
            return ctx.canceled("canceled before local execution");
        }

        let token = ctx.cancel_token();
        let deadline = ctx.deadline();

        let handler_cfg = cfg.clone();
        let handler_token = token.clone();
        let mut join = tokio::task::spawn_blocking(move || handler(&handler_cfg, &handler_token));

        let mut timed_out = false;
        let result = loop {
            tokio::select! {
                joined = &mut join => {
                    break match joined {
                        Ok(r) => r,
                        Err(e) if e.is_panic() => TaskResult::failed(format!("exception: local handler panicked: {e}")),
                        Err(e) => TaskResult::failed(format!("local handler join error: {e}")),
                    };
                }
                _ = tokio::time::sleep(WATCHDOG_INTERVAL) => {
                    if !timed_out {
                        if let Some(d) = deadline {
                            if Instant::now() >= d {
                                timed_out = true;
                                // Soft timeout: the handler must notice the flag.
                                token.cancel();
                            }
                        }
                    }
                }
            }
        };

        let mut r = if timed_out { ctx.timeout("local task soft timeout") } else { result };
        r.duration_ms = start.elapsed().as_millis() as i64;
        info!(task = %cfg.id, handler = %key, status = r.status.as_str(), "local task finished");
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CancelToken;
    use crate::task::TaskConfig;

    fn strategy_with(reg: &Arc<LocalTaskRegistry>) -> LocalStrategy {
        LocalStrategy::new(reg.clone())
    }

    #[tokio::test]
    async fn handler_lookup_prefers_handler_param() {
        let reg = Arc::new(LocalTaskRegistry::new());
        reg.register("special", |_c, _t| TaskResult::success("via param"));
        let mut cfg = TaskConfig::new("other");
        cfg.exec_params.insert("handler".into(), "special".into());

        let ctx = ExecutionContext::new(&cfg, CancelToken::new(), None);
        let r = strategy_with(&reg).execute(&ctx).await;
        assert_eq!(r.message, "via param");
    }

    #[tokio::test]
    async fn missing_handler_fails() {
        let reg = Arc::new(LocalTaskRegistry::new());
        let cfg = TaskConfig::new("nope");
        let ctx = ExecutionContext::new(&cfg, CancelToken::new(), None);
        let r = strategy_with(&reg).execute(&ctx).await;
        assert_eq!(r.status, TaskStatus::Failed);
        assert!(r.message.contains("not found"));
    }

    #[tokio::test]
    async fn soft_timeout_flips_cancel_flag() {
        let reg = Arc::new(LocalTaskRegistry::new());
        reg.register("stubborn", |_cfg, cancel| {
            // Cooperative handler: spins until the flag flips.
            while !cancel.is_canceled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            TaskResult::success("gave up")
        });

        let cfg = TaskConfig::new("stubborn");
        let deadline = Instant::now() + Duration::from_millis(100);
        let ctx = ExecutionContext::new(&cfg, CancelToken::new(), Some(deadline));
        let r = strategy_with(&reg).execute(&ctx).await;
        assert_eq!(r.status, TaskStatus::Timeout);
    }
}
