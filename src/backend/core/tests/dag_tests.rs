//! End-to-end DAG engine tests against the assembled facade with the
//! in-memory store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use taskhub_core::app::TaskHub;
use taskhub_core::config::Config;
use taskhub_core::execution::ReqwestSender;
use taskhub_core::prelude::*;

fn facade(pool_workers: usize) -> Arc<TaskHub> {
    let store = Arc::new(MemoryStore::new());
    let hub = TaskHub::new(Config::default(), store.clone(), store, Arc::new(ReqwestSender));
    hub.pool.start(pool_workers);
    hub
}

fn status_of(result: &DagResult, id: &str) -> Option<TaskStatus> {
    result
        .task_results
        .iter()
        .find(|(task_id, _)| task_id.value == id)
        .map(|(_, r)| r.status)
}

#[tokio::test]
async fn diamond_with_skip_downstream() {
    let hub = facade(4);

    // a -> b, a -> c, b -> d, c -> d; b fails.
    let body = json!({
        "name": "diamond",
        "config": { "fail_policy": "SkipDownstream", "max_parallel": 4 },
        "tasks": [
            { "id": "a", "exec_type": "Shell", "exec_command": "echo a" },
            { "id": "b", "exec_type": "Shell", "exec_command": "exit 7", "deps": ["a"] },
            { "id": "c", "exec_type": "Shell", "exec_command": "echo c", "deps": ["a"] },
            { "id": "d", "exec_type": "Shell", "exec_command": "echo d", "deps": ["b", "c"] },
        ]
    });

    let result = hub.run_dag(body, "manual").await;
    assert!(!result.success);
    assert_eq!(status_of(&result, "a"), Some(TaskStatus::Success));
    assert_eq!(status_of(&result, "b"), Some(TaskStatus::Failed));
    assert_eq!(status_of(&result, "c"), Some(TaskStatus::Success));
    assert_eq!(status_of(&result, "d"), Some(TaskStatus::Skipped));

    let (total, success, failed, skipped) = result.summary();
    assert_eq!((total, success, failed, skipped), (4, 2, 1, 1));

    // Persistence mirrors the outcome.
    let filter = QueryFilter { run_id: Some(result.run_id.clone()), limit: 10, ..Default::default() };
    let runs = hub.run_store.query_runs(&filter).await.unwrap();
    assert_eq!(runs[0].failed_count, 1);
    assert_eq!(runs[0].skipped_count, 1);

    let tasks = hub.run_store.query_task_runs(&filter).await.unwrap();
    let skipped_row = tasks.iter().find(|t| t.task_id == "d").unwrap();
    assert_eq!(skipped_row.status, 4);
    assert!(skipped_row.message.contains("skip_downstream upstream=b"));

    hub.shutdown().await;
}

#[tokio::test]
async fn fail_fast_short_circuits_chain() {
    let hub = facade(2);

    let body = json!({
        "config": { "fail_policy": "FailFast", "max_parallel": 1 },
        "tasks": [
            { "id": "a", "exec_type": "Shell", "exec_command": "sleep 0.3" },
            { "id": "b", "exec_type": "Shell", "exec_command": "false", "deps": ["a"] },
            { "id": "c", "exec_type": "Shell", "exec_command": "echo c", "deps": ["b"] },
            { "id": "d", "exec_type": "Shell", "exec_command": "echo d", "deps": ["c"] },
        ]
    });

    let started = Instant::now();
    let result = hub.run_dag(body, "manual").await;
    assert!(!result.success);
    assert_eq!(result.message, "dag failed");
    // Returns promptly after b's failure: nothing downstream ran.
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(status_of(&result, "a"), Some(TaskStatus::Success));
    assert_eq!(status_of(&result, "b"), Some(TaskStatus::Failed));
    assert_eq!(status_of(&result, "c"), None);
    assert_eq!(status_of(&result, "d"), None);

    let filter = QueryFilter { run_id: Some(result.run_id.clone()), limit: 10, ..Default::default() };
    let runs = hub.run_store.query_runs(&filter).await.unwrap();
    assert!(runs[0].failed_count >= 1);

    hub.shutdown().await;
}

#[tokio::test]
async fn nested_dag_completes_on_single_worker_pool() {
    let hub = facade(1);

    let inner = json!([
        { "id": "x", "exec_type": "Shell", "exec_command": "echo x" },
        { "id": "y", "exec_type": "Shell", "exec_command": "echo y" },
    ]);
    let body = json!({
        "config": { "max_parallel": 1 },
        "tasks": [{
            "id": "outer",
            "exec_type": "Dag",
            "exec_params": {
                "tasks": inner.to_string(),
                "config": json!({"max_parallel": 2}).to_string(),
            }
        }]
    });

    let result = tokio::time::timeout(Duration::from_secs(15), hub.run_dag(body, "manual"))
        .await
        .expect("nested dag deadlocked");
    assert!(result.success, "outer dag failed: {}", result.message);
    assert_eq!(status_of(&result, "outer"), Some(TaskStatus::Success));

    hub.shutdown().await;
}

#[tokio::test]
async fn every_node_reaches_exactly_one_terminal_status() {
    let hub = facade(4);

    let body = json!({
        "config": { "fail_policy": "SkipDownstream", "max_parallel": 3 },
        "tasks": [
            { "id": "t1", "exec_type": "Shell", "exec_command": "echo 1" },
            { "id": "t2", "exec_type": "Shell", "exec_command": "exit 1" },
            { "id": "t3", "exec_type": "Shell", "exec_command": "echo 3", "deps": ["t1"] },
            { "id": "t4", "exec_type": "Shell", "exec_command": "echo 4", "deps": ["t2"] },
            { "id": "t5", "exec_type": "Shell", "exec_command": "echo 5", "deps": ["t3", "t4"] },
        ]
    });

    let result = hub.run_dag(body, "manual").await;
    let (total, success, failed, skipped) = result.summary();
    assert_eq!(total, 5);
    assert_eq!(success + failed + skipped, 5);
    for r in result.task_results.values() {
        assert!(r.status.is_terminal());
    }

    hub.shutdown().await;
}

#[tokio::test]
async fn cycle_and_missing_dep_rejected_before_any_node_runs() {
    let hub = facade(2);

    let cyclic = json!({
        "tasks": [
            { "id": "a", "exec_type": "Shell", "exec_command": "echo a", "deps": ["b"] },
            { "id": "b", "exec_type": "Shell", "exec_command": "echo b", "deps": ["a"] },
        ]
    });
    let result = hub.run_dag(cyclic, "manual").await;
    assert!(!result.success);
    assert!(result.message.contains("cycle"));
    assert!(result.task_results.is_empty());

    let dangling = json!({
        "tasks": [{ "id": "a", "exec_type": "Shell", "exec_command": "echo a", "deps": ["ghost"] }]
    });
    let result = hub.run_dag(dangling, "manual").await;
    assert!(!result.success);
    assert!(result.message.contains("ghost"));

    hub.shutdown().await;
}

#[tokio::test]
async fn nesting_depth_limit_fails_runaway_recursion() {
    let hub = facade(2);

    // A dag whose only task is itself a Dag with an absurd declared depth.
    let body = json!({
        "_nesting_depth": 20,
        "tasks": [{
            "id": "outer",
            "exec_type": "Dag",
            "exec_params": { "tasks": "[{\"id\":\"x\",\"exec_type\":\"Shell\",\"exec_command\":\"echo x\"}]" }
        }]
    });

    let result = hub.run_dag(body, "manual").await;
    assert!(!result.success);
    let outer = result.task_results.values().next().unwrap();
    assert!(outer.message.contains("nesting depth exceeded"));

    hub.shutdown().await;
}
