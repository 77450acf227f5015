//! Cooperative cancellation and the context handed to execution
//! strategies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::task::{TaskConfig, TaskResult};

/// Maximum depth for nested Dag/Template execution.
pub const MAX_NESTING_DEPTH: u32 = 10;

/// Shared atomic cancel flag. The owner sets it; every cooperating point
/// (attempt start, backoff ticks, strategy poll loops) observes it.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Context a strategy executes under: the task config, the effective
/// cancel flag, and the attempt deadline.
pub struct ExecutionContext<'a> {
    pub cfg: &'a TaskConfig,
    cancel: CancelToken,
    deadline: Option<Instant>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(cfg: &'a TaskConfig, cancel: CancelToken, deadline: Option<Instant>) -> Self {
        Self { cfg, cancel, deadline }
    }

    pub fn get(&self, key: &str, default: &str) -> String {
        self.cfg.param(key).unwrap_or(default).to_string()
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.cfg.param(key).and_then(|s| s.parse().ok()).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.cfg.param(key) {
            Some("true") | Some("1") | Some("yes") => true,
            Some("false") | Some("0") | Some("no") => false,
            _ => default,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Time left before the deadline; `None` when no timeout is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Nesting depth carried in `exec_params` by the DAG service.
    pub fn nesting_depth(&self) -> u32 {
        self.get_int("_nesting_depth", 0).max(0) as u32
    }

    pub fn success(&self, msg: impl Into<String>) -> TaskResult {
        TaskResult::success(msg)
    }

    pub fn fail(&self, msg: impl Into<String>) -> TaskResult {
        TaskResult::failed(msg)
    }

    pub fn canceled(&self, msg: impl Into<String>) -> TaskResult {
        TaskResult::canceled(msg)
    }

    pub fn timeout(&self, msg: impl Into<String>) -> TaskResult {
        TaskResult::timeout(msg)
    }
}
