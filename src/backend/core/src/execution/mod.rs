//! Execution strategies, one per `TaskExecType`.
//!
//! Each strategy implements a single-method contract against the
//! [`ExecutionContext`] handed to it by the task runner. The registry maps
//! exec types to strategy objects and is populated at service wiring time
//! (Dag/Template strategies need the DAG service, which in turn owns the
//! runner, so registration happens after construction).

mod dag;
mod http;
mod local;
mod remote;
mod shell;
mod template;

pub use dag::DagStrategy;
pub use http::HttpCallStrategy;
pub use local::LocalStrategy;
pub use remote::{HttpSender, RemoteStrategy, ReqwestSender};
pub use shell::ShellStrategy;
pub use template::TemplateStrategy;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::runner::ExecutionContext;
use crate::task::{TaskExecType, TaskResult};

/// One attempt of one task. Implementations must map every internal
/// failure to a `TaskResult` (never panic across this boundary on
/// purpose) and honor the context's cancel flag and deadline.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    async fn execute(&self, ctx: &ExecutionContext<'_>) -> TaskResult;
}

/// `TaskExecType` -> strategy dispatch table.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: RwLock<HashMap<TaskExecType, Arc<dyn ExecutionStrategy>>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, exec_type: TaskExecType, strategy: Arc<dyn ExecutionStrategy>) {
        self.strategies.write().insert(exec_type, strategy);
    }

    pub fn get(&self, exec_type: TaskExecType) -> Option<Arc<dyn ExecutionStrategy>> {
        self.strategies.read().get(&exec_type).cloned()
    }

    pub fn has(&self, exec_type: TaskExecType) -> bool {
        self.strategies.read().contains_key(&exec_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Always(TaskResult);

    #[async_trait]
    impl ExecutionStrategy for Always {
        async fn execute(&self, _ctx: &ExecutionContext<'_>) -> TaskResult {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn register_and_dispatch() {
        let reg = StrategyRegistry::new();
        assert!(!reg.has(TaskExecType::Shell));
        reg.register(TaskExecType::Shell, Arc::new(Always(TaskResult::success("hi"))));
        assert!(reg.has(TaskExecType::Shell));

        let cfg = crate::task::TaskConfig::new("t");
        let ctx = ExecutionContext::new(&cfg, crate::runner::CancelToken::new(), None);
        let r = reg.get(TaskExecType::Shell).unwrap().execute(&ctx).await;
        assert!(r.ok());
    }
}
