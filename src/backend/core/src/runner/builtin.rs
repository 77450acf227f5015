//! Built-in local task handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::registry::LocalTaskRegistry;
use crate::task::TaskResult;

/// Register the stock local handlers used by demos and tests.
pub fn register_builtin_tasks(registry: &LocalTaskRegistry) {
    registry.register("echo", |cfg, _cancel| {
        let msg = cfg.param("msg").unwrap_or(&cfg.exec_command);
        let mut r = TaskResult::success(msg.to_string());
        if cfg.capture_output {
            r.stdout = msg.to_string();
        }
        r
    });

    // Sleeps in short slices so cancellation stays responsive.
    registry.register("sleep_ms", |cfg, cancel| {
        let total = cfg.param("duration_ms").and_then(|s| s.parse::<u64>().ok()).unwrap_or(1000);
        let mut slept = 0u64;
        while slept < total {
            if cancel.is_canceled() {
                return TaskResult::canceled("sleep_ms canceled");
            }
            let step = (total - slept).min(20);
            std::thread::sleep(Duration::from_millis(step));
            slept += step;
        }
        TaskResult::success(format!("slept {total}ms"))
    });

    let counter = Arc::new(AtomicU64::new(0));
    registry.register("count", move |_cfg, _cancel| {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut r = TaskResult::success(format!("count={n}"));
        r.metadata.insert("count".into(), n.to_string());
        r
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CancelToken;
    use crate::task::TaskConfig;

    #[test]
    fn count_increments_across_calls() {
        let reg = LocalTaskRegistry::new();
        register_builtin_tasks(&reg);
        let cfg = TaskConfig::new("c");
        let h = reg.find("count").unwrap();
        assert_eq!(h(&cfg, &CancelToken::new()).metadata["count"], "1");
        assert_eq!(h(&cfg, &CancelToken::new()).metadata["count"], "2");
    }

    #[test]
    fn sleep_observes_cancel() {
        let reg = LocalTaskRegistry::new();
        register_builtin_tasks(&reg);
        let mut cfg = TaskConfig::new("s");
        cfg.exec_params.insert("duration_ms".into(), "5000".into());
        let cancel = CancelToken::new();
        cancel.cancel();
        let r = reg.find("sleep_ms").unwrap()(&cfg, &cancel);
        assert_eq!(r.status, crate::task::TaskStatus::Canceled);
    }
}
