//! # TaskHub Core
//!
//! Workflow and task orchestration service.
//!
//! ## Architecture
//!
//! - **Task runner**: per-task timeout, retry with backoff, cooperative
//!   cancellation
//! - **Execution strategies**: shell, HTTP, in-process, remote-worker,
//!   nested DAG, and template execution behind one trait
//! - **DAG engine**: build-time validation, a shared priority worker pool
//!   with dynamic growth, and a bounded-parallel topological scheduler
//!   with FailFast / SkipDownstream policies
//! - **Cron scheduler**: drift-free 5-field cron dispatch onto the engine
//! - **Worker registry**: remote worker health, selection, and cooldown
//! - **Log pipeline**: per-task ring buffers, rotating file sink, and
//!   WebSocket streaming with per-session subscriptions
//! - **Persistence**: DAG runs, task runs, events, and templates behind
//!   async store traits (SQLite in production)

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod cron;
pub mod dag;
pub mod error;
pub mod execution;
pub mod logging;
pub mod runner;
pub mod store;
pub mod task;
pub mod template;
pub mod worker;
pub mod ws;

pub use error::{ErrorCode, Result, TaskHubError};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::app::TaskHub;
    pub use crate::config::Config;
    pub use crate::cron::{CronExpr, CronJob, CronScheduler};
    pub use crate::dag::{DagBuilder, DagConfig, DagPool, DagResult, DagService, FailPolicy};
    pub use crate::error::{ErrorCode, Result, TaskHubError};
    pub use crate::execution::{ExecutionStrategy, HttpSender, StrategyRegistry};
    pub use crate::logging::{LogLevel, LogManager, LogRecord, LogStream};
    pub use crate::runner::{CancelToken, LocalTaskRegistry, TaskRunner};
    pub use crate::store::{MemoryStore, QueryFilter, RunStore, SqliteStore, TemplateStore};
    pub use crate::task::{TaskConfig, TaskExecType, TaskId, TaskPriority, TaskResult, TaskStatus};
    pub use crate::template::{TaskTemplate, TemplateService};
    pub use crate::worker::{WorkerInfo, WorkerRegistry};
    pub use crate::ws::{WsHub, WsLogStreamer};
}
