//! Task runner behavior through the full strategy stack.

use std::sync::Arc;
use std::time::{Duration, Instant};

use taskhub_core::app::TaskHub;
use taskhub_core::config::Config;
use taskhub_core::execution::ReqwestSender;
use taskhub_core::prelude::*;

fn facade() -> Arc<TaskHub> {
    let store = Arc::new(MemoryStore::new());
    TaskHub::new(Config::default(), store.clone(), store, Arc::new(ReqwestSender))
}

#[tokio::test]
async fn shell_timeout_is_terminal_and_not_retried() {
    let hub = facade();

    let mut cfg = TaskConfig::new("sleeper");
    cfg.exec_type = TaskExecType::Shell;
    cfg.exec_command = "sleep 5".into();
    cfg.timeout = Duration::from_millis(1000);
    cfg.retry_count = 2;
    cfg.retry_delay = Duration::from_millis(100);
    cfg.retry_exp_backoff = true;

    let started = Instant::now();
    let result = hub.runner.run(&cfg, None).await;
    let elapsed = started.elapsed();

    assert_eq!(result.status, TaskStatus::Timeout);
    // One attempt only; a retried timeout would push well past 2s.
    assert_eq!(result.attempt, 1);
    assert_eq!(result.max_attempts, 3);
    assert!(elapsed >= Duration::from_millis(900), "returned before the deadline: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(3500), "timeout was retried: {elapsed:?}");
}

#[tokio::test]
async fn shell_failure_retries_with_attempt_accounting() {
    let hub = facade();
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("attempts");

    // Fails until the third invocation.
    let script = format!(
        "echo x >> {marker}; test $(wc -l < {marker}) -ge 3",
        marker = marker.display()
    );
    let mut cfg = TaskConfig::new("flaky");
    cfg.exec_type = TaskExecType::Shell;
    cfg.exec_command = script;
    cfg.retry_count = 4;
    cfg.retry_delay = Duration::from_millis(10);
    cfg.retry_exp_backoff = false;

    let result = hub.runner.run(&cfg, None).await;
    assert!(result.ok());
    assert_eq!(result.attempt, 3);
    assert_eq!(result.max_attempts, 5);
}

#[tokio::test]
async fn local_handler_runs_through_registry() {
    let hub = facade();

    let mut cfg = TaskConfig::new("greeting");
    cfg.exec_type = TaskExecType::Local;
    cfg.exec_params.insert("handler".into(), "echo".into());
    cfg.exec_params.insert("msg".into(), "hello from local".into());

    let result = hub.runner.run(&cfg, None).await;
    assert!(result.ok());
    assert_eq!(result.message, "hello from local");
}

#[tokio::test]
async fn cancellation_interrupts_backoff() {
    let hub = facade();

    let mut cfg = TaskConfig::new("never-works");
    cfg.exec_type = TaskExecType::Shell;
    cfg.exec_command = "false".into();
    cfg.retry_count = 10;
    cfg.retry_delay = Duration::from_secs(30);
    cfg.retry_exp_backoff = false;

    let token = CancelToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let result = hub.runner.run(&cfg, Some(token)).await;
    assert_eq!(result.status, TaskStatus::Canceled);
    // The 30s backoff must be abandoned within its 50ms slices.
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn log_pipeline_records_attempt_events() {
    let hub = facade();

    let mut cfg = TaskConfig::new("observed");
    cfg.exec_type = TaskExecType::Shell;
    cfg.exec_command = "echo hi".into();

    let result = hub.runner.run(&cfg, None).await;
    assert!(result.ok());

    let page = hub.log.query(&TaskId::new("observed"), 1, 100);
    assert!(!page.records.is_empty());
    let messages: Vec<&str> = page.records.iter().map(|r| r.message.as_str()).collect();
    assert!(messages.iter().any(|m| m.contains("attempt start 1/1")));
    assert!(messages.iter().any(|m| m.contains("task end")));
    // Sequence numbers are strictly increasing.
    let seqs: Vec<u64> = page.records.iter().map(|r| r.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
}
