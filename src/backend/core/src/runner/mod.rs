//! Task execution: cooperative cancellation, the per-task execution
//! context handed to strategies, the local handler registry, and the
//! retrying task runner.

mod builtin;
mod context;
mod executor;
mod registry;

pub use builtin::register_builtin_tasks;
pub use context::{CancelToken, ExecutionContext, MAX_NESTING_DEPTH};
pub use executor::TaskRunner;
pub use registry::{LocalHandler, LocalTaskRegistry};
