//! Name -> handler map for in-process tasks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::context::CancelToken;
use crate::task::{TaskConfig, TaskResult};

/// An in-process task handler. Handlers run on a blocking thread and are
/// expected to observe the cancel token at their own pace.
pub type LocalHandler = Arc<dyn Fn(&TaskConfig, &CancelToken) -> TaskResult + Send + Sync>;

/// Registry of local handlers, looked up by the Local strategy via the
/// `handler` exec param (falling back to `exec_command`, then the task id).
#[derive(Default)]
pub struct LocalTaskRegistry {
    handlers: RwLock<HashMap<String, LocalHandler>>,
}

impl LocalTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, key: impl Into<String>, handler: F)
    where
        F: Fn(&TaskConfig, &CancelToken) -> TaskResult + Send + Sync + 'static,
    {
        self.handlers.write().insert(key.into(), Arc::new(handler));
    }

    pub fn find(&self, key: &str) -> Option<LocalHandler> {
        self.handlers.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_find() {
        let reg = LocalTaskRegistry::new();
        reg.register("noop", |_cfg, _cancel| TaskResult::success(""));
        assert!(reg.find("noop").is_some());
        assert!(reg.find("missing").is_none());

        let cfg = TaskConfig::new("t");
        let r = reg.find("noop").unwrap()(&cfg, &CancelToken::new());
        assert!(r.ok());
    }
}
