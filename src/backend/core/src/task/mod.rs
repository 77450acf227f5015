//! Core task identifiers and execution descriptors.
//!
//! Everything the scheduler, the DAG engine, and the wire format agree on
//! lives here: task identity, status, priority, execution type, the
//! immutable `TaskConfig` descriptor, and the `TaskResult` it produces.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ErrorCode, Result, TaskHubError};

/// Logical task identity plus a per-execution disambiguator.
///
/// `value` identifies the task inside a spec; `run_id` separates concurrent
/// executions of the same spec. An empty `run_id` means "unassigned"
/// (the manual single-task path).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    pub value: String,
    #[serde(default)]
    pub run_id: String,
}

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into(), run_id: String::new() }
    }

    pub fn with_run(value: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self { value: value.into(), run_id: run_id.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.run_id.is_empty() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{}@{}", self.value, self.run_id)
        }
    }
}

/// Task lifecycle status. The last five are terminal: a node leaves
/// `Pending` at most once and, once terminal, never transitions again.
///
/// The numeric values are part of the persistence and wire format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum TaskStatus {
    #[default]
    Pending = 0,
    Running = 1,
    Success = 2,
    Failed = 3,
    Skipped = 4,
    Canceled = 5,
    Timeout = 6,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    pub fn as_i32(&self) -> i32 {
        *self as i32
    }

    pub fn from_i32(v: i32) -> TaskStatus {
        match v {
            0 => TaskStatus::Pending,
            1 => TaskStatus::Running,
            2 => TaskStatus::Success,
            4 => TaskStatus::Skipped,
            5 => TaskStatus::Canceled,
            6 => TaskStatus::Timeout,
            _ => TaskStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Running => "Running",
            TaskStatus::Success => "Success",
            TaskStatus::Failed => "Failed",
            TaskStatus::Skipped => "Skipped",
            TaskStatus::Canceled => "Canceled",
            TaskStatus::Timeout => "Timeout",
        }
    }
}

/// Scheduling priority, mapped to pool queue indices `Critical=0 .. Low=3`.
///
/// The wire format uses the integers `-1, 0, 1, 2`. Tasks arriving through
/// the HTTP surface are clamped to `High`; only internal scheduler code may
/// submit `Critical`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_wire_int(&self) -> i32 {
        match self {
            TaskPriority::Low => -1,
            TaskPriority::Normal => 0,
            TaskPriority::High => 1,
            TaskPriority::Critical => 2,
        }
    }

    pub fn from_wire_int(v: i32) -> TaskPriority {
        match v {
            -1 => TaskPriority::Low,
            1 => TaskPriority::High,
            2 => TaskPriority::Critical,
            _ => TaskPriority::Normal,
        }
    }

    /// Pool queue index: Critical=0, High=1, Normal=2, Low=3.
    pub fn queue_index(&self) -> usize {
        match self {
            TaskPriority::Critical => 0,
            TaskPriority::High => 1,
            TaskPriority::Normal => 2,
            TaskPriority::Low => 3,
        }
    }
}

/// Execution mechanism of a task. Each variant maps 1:1 to a strategy in
/// the execution registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskExecType {
    #[default]
    Local,
    Remote,
    Script,
    HttpCall,
    Shell,
    Dag,
    Template,
}

impl TaskExecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskExecType::Local => "Local",
            TaskExecType::Remote => "Remote",
            TaskExecType::Script => "Script",
            TaskExecType::HttpCall => "HttpCall",
            TaskExecType::Shell => "Shell",
            TaskExecType::Dag => "Dag",
            TaskExecType::Template => "Template",
        }
    }

    /// Case-insensitive parse; unknown strings fall back to `Local`.
    pub fn parse(s: &str) -> TaskExecType {
        match s.to_ascii_lowercase().as_str() {
            "remote" => TaskExecType::Remote,
            "script" => TaskExecType::Script,
            "httpcall" | "http_call" | "http" => TaskExecType::HttpCall,
            "shell" => TaskExecType::Shell,
            "dag" => TaskExecType::Dag,
            "template" => TaskExecType::Template,
            _ => TaskExecType::Local,
        }
    }
}

/// Immutable execution descriptor for a single task.
///
/// `exec_params` carries strategy-specific inputs (HTTP headers, local
/// handler key, nested DAG JSON, template id, `_nesting_depth`, ...); all
/// values are strings so the descriptor survives JSON round-trips without
/// loss.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: TaskId,
    pub name: String,
    pub exec_type: TaskExecType,
    pub exec_command: String,
    pub exec_params: HashMap<String, String>,
    /// Zero means "no timeout".
    pub timeout: Duration,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub retry_exp_backoff: bool,
    pub cancelable: bool,
    pub priority: TaskPriority,
    pub queue: String,
    pub metadata: HashMap<String, String>,
    pub capture_output: bool,
}

impl TaskConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(id),
            retry_delay: Duration::from_millis(1000),
            retry_exp_backoff: true,
            cancelable: true,
            capture_output: true,
            ..Default::default()
        }
    }

    pub fn has_timeout(&self) -> bool {
        !self.timeout.is_zero()
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.exec_params.get(key).map(|s| s.as_str())
    }
}

/// Outcome of one task execution (final attempt).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub message: String,
    pub duration_ms: i64,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub attempt: u32,
    pub max_attempts: u32,
    pub worker_id: String,
    pub worker_host: String,
    pub worker_port: u16,
    pub metadata: HashMap<String, String>,
}

impl TaskResult {
    pub fn ok(&self) -> bool {
        self.status == TaskStatus::Success
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self { status: TaskStatus::Success, message: message.into(), attempt: 1, max_attempts: 1, ..Default::default() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { status: TaskStatus::Failed, message: message.into(), attempt: 1, max_attempts: 1, ..Default::default() }
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self { status: TaskStatus::Canceled, message: message.into(), attempt: 1, max_attempts: 1, ..Default::default() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self { status: TaskStatus::Timeout, message: message.into(), attempt: 1, max_attempts: 1, ..Default::default() }
    }
}

/// Serialize a `TaskConfig` into the canonical `{ "task": {...} }` request
/// envelope used for remote dispatch and persistence.
pub fn build_request_json(cfg: &TaskConfig) -> Value {
    let params: serde_json::Map<String, Value> =
        cfg.exec_params.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
    let metadata: serde_json::Map<String, Value> =
        cfg.metadata.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();

    json!({
        "task": {
            "id": cfg.id.value,
            "name": cfg.name,
            "exec_type": cfg.exec_type.as_str(),
            "exec_command": cfg.exec_command,
            "exec_params": Value::Object(params),
            "timeout_ms": cfg.timeout.as_millis() as i64,
            "retry_count": cfg.retry_count,
            "retry_delay_ms": cfg.retry_delay.as_millis() as i64,
            "retry_exp_backoff": cfg.retry_exp_backoff,
            "priority": cfg.priority.as_wire_int(),
            "queue": cfg.queue,
            "capture_output": cfg.capture_output,
            "metadata": Value::Object(metadata),
        }
    })
}

fn string_map_from(obj: Option<&Value>) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Some(Value::Object(map)) = obj {
        for (k, v) in map {
            let s = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.insert(k.clone(), s);
        }
    }
    out
}

/// Parse a task config from either `{ "task": {...} }` or a bare task
/// object. Non-string `exec_params` values are serialized via dump so they
/// survive the internal string map.
///
/// The ingress priority clamp lives here: `Critical` parses as `High`.
pub fn parse_task_config(body: &Value) -> Result<TaskConfig> {
    let jt = match body.get("task") {
        Some(t) if t.is_object() => t,
        _ => body,
    };
    if !jt.is_object() {
        return Err(TaskHubError::new(ErrorCode::InvalidJson, "task must be a JSON object"));
    }

    let id = jt.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
    if id.is_empty() {
        return Err(TaskHubError::new(ErrorCode::MissingRequiredField, "task id is required"));
    }

    let mut cfg = TaskConfig::new(id);
    if let Some(run_id) = jt.get("run_id").and_then(Value::as_str) {
        cfg.id.run_id = run_id.to_string();
    }
    cfg.name = jt.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
    cfg.exec_type = TaskExecType::parse(jt.get("exec_type").and_then(Value::as_str).unwrap_or("Local"));
    cfg.exec_command = jt.get("exec_command").and_then(Value::as_str).unwrap_or_default().to_string();
    cfg.queue = jt.get("queue").and_then(Value::as_str).unwrap_or_default().to_string();
    cfg.capture_output = jt.get("capture_output").and_then(Value::as_bool).unwrap_or(true);
    cfg.cancelable = jt.get("cancelable").and_then(Value::as_bool).unwrap_or(true);

    cfg.timeout = Duration::from_millis(jt.get("timeout_ms").and_then(Value::as_i64).unwrap_or(0).max(0) as u64);
    cfg.retry_count = jt.get("retry_count").and_then(Value::as_i64).unwrap_or(0).max(0) as u32;
    cfg.retry_delay =
        Duration::from_millis(jt.get("retry_delay_ms").and_then(Value::as_i64).unwrap_or(1000).max(0) as u64);
    cfg.retry_exp_backoff = jt.get("retry_exp_backoff").and_then(Value::as_bool).unwrap_or(true);

    let priority = TaskPriority::from_wire_int(jt.get("priority").and_then(Value::as_i64).unwrap_or(0) as i32);
    cfg.priority = if priority == TaskPriority::Critical { TaskPriority::High } else { priority };

    cfg.exec_params = string_map_from(jt.get("exec_params"));
    cfg.metadata = string_map_from(jt.get("metadata"));

    Ok(cfg)
}

/// Serialize a `TaskResult` for the wire (status as int, durations in ms).
pub fn task_result_to_json(r: &TaskResult) -> Value {
    let metadata: serde_json::Map<String, Value> =
        r.metadata.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
    json!({
        "status": r.status.as_i32(),
        "message": r.message,
        "exit_code": r.exit_code,
        "duration_ms": r.duration_ms,
        "stdout": r.stdout,
        "stderr": r.stderr,
        "attempt": r.attempt,
        "max_attempts": r.max_attempts,
        "metadata": Value::Object(metadata),
    })
}

/// Parse a `TaskResult` from either a bare object or `{ "result": {...} }`.
/// A missing status defaults to `Failed` so a worker that returns a
/// malformed body is never mistaken for a success.
pub fn parse_task_result(body: &Value) -> TaskResult {
    let jr = match body.get("result") {
        Some(r) if r.is_object() => r,
        _ => body,
    };

    let mut r = TaskResult {
        status: TaskStatus::from_i32(jr.get("status").and_then(Value::as_i64).unwrap_or(3) as i32),
        message: jr.get("message").and_then(Value::as_str).unwrap_or_default().to_string(),
        exit_code: jr.get("exit_code").and_then(Value::as_i64).unwrap_or(0) as i32,
        duration_ms: jr.get("duration_ms").and_then(Value::as_i64).unwrap_or(0),
        stdout: jr.get("stdout").and_then(Value::as_str).unwrap_or_default().to_string(),
        stderr: jr.get("stderr").and_then(Value::as_str).unwrap_or_default().to_string(),
        attempt: jr.get("attempt").and_then(Value::as_i64).unwrap_or(1) as u32,
        max_attempts: jr.get("max_attempts").and_then(Value::as_i64).unwrap_or(1) as u32,
        ..Default::default()
    };
    r.metadata = string_map_from(jr.get("metadata"));
    r
}

/// Extract the DAG body (`{config, tasks}`) embedded in a task config.
///
/// Supports the structured form (`exec_params.tasks` + `exec_params.config`)
/// and the legacy `dag_json` string (falling back to `exec_command`).
pub fn extract_dag_body(cfg: &TaskConfig) -> Result<Value> {
    if let Some(tasks_raw) = cfg.param("tasks") {
        let tasks: Value = serde_json::from_str(tasks_raw)
            .map_err(|e| TaskHubError::new(ErrorCode::InvalidJson, format!("invalid tasks array: {e}")))?;
        let config = match cfg.param("config") {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| TaskHubError::new(ErrorCode::InvalidJson, format!("invalid dag config: {e}")))?,
            None => {
                // Flattened keys kept for older payloads.
                let mut config = serde_json::Map::new();
                if let Some(fp) = cfg.param("config.fail_policy") {
                    config.insert("fail_policy".into(), Value::String(fp.to_string()));
                }
                if let Some(mp) = cfg.param("config.max_parallel") {
                    config.insert("max_parallel".into(), json!(mp.parse::<i64>().unwrap_or(4)));
                }
                config.insert("name".into(), Value::String(cfg.name.clone()));
                Value::Object(config)
            }
        };
        return Ok(json!({ "tasks": tasks, "config": config }));
    }

    let raw = cfg.param("dag_json").map(str::to_string).unwrap_or_else(|| cfg.exec_command.clone());
    if raw.is_empty() {
        return Err(TaskHubError::new(ErrorCode::MissingRequiredField, "missing dag_json or tasks array"));
    }
    let body: Value = serde_json::from_str(&raw)
        .map_err(|e| TaskHubError::new(ErrorCode::InvalidJson, format!("invalid dag_json: {e}")))?;
    if !body.is_object() {
        return Err(TaskHubError::new(ErrorCode::InvalidJson, "dag_json must be a JSON object"));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical_cfg() -> TaskConfig {
        let mut cfg = TaskConfig::new("build");
        cfg.name = "build step".into();
        cfg.exec_type = TaskExecType::Shell;
        cfg.exec_command = "make all".into();
        cfg.exec_params.insert("cwd".into(), "/tmp".into());
        cfg.timeout = Duration::from_millis(5000);
        cfg.retry_count = 2;
        cfg.retry_delay = Duration::from_millis(250);
        cfg.retry_exp_backoff = false;
        cfg.priority = TaskPriority::High;
        cfg.queue = "io".into();
        cfg.metadata.insert("tenant".into(), "acme".into());
        cfg
    }

    #[test]
    fn request_json_round_trip() {
        let cfg = canonical_cfg();
        let parsed = parse_task_config(&build_request_json(&cfg)).unwrap();
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn bare_task_object_accepted() {
        let body = json!({"id": "t1", "exec_type": "shell", "exec_command": "true"});
        let cfg = parse_task_config(&body).unwrap();
        assert_eq!(cfg.exec_type, TaskExecType::Shell);
        assert_eq!(cfg.id.value, "t1");
    }

    #[test]
    fn missing_id_rejected() {
        let err = parse_task_config(&json!({"task": {"name": "no id"}})).unwrap_err();
        assert_eq!(err.code(), ErrorCode::MissingRequiredField);
    }

    #[test]
    fn critical_priority_clamped_at_ingress() {
        let cfg = parse_task_config(&json!({"id": "t", "priority": 2})).unwrap();
        assert_eq!(cfg.priority, TaskPriority::High);
    }

    #[test]
    fn non_string_exec_params_survive_as_dumps() {
        let body = json!({"id": "t", "exec_params": {"count": 3, "flags": {"a": true}}});
        let cfg = parse_task_config(&body).unwrap();
        assert_eq!(cfg.param("count"), Some("3"));
        assert_eq!(cfg.param("flags"), Some(r#"{"a":true}"#));
    }

    #[test]
    fn result_defaults_to_failed_on_missing_status() {
        let r = parse_task_result(&json!({"message": "??"}));
        assert_eq!(r.status, TaskStatus::Failed);
    }

    #[test]
    fn exec_type_parse_is_case_insensitive() {
        assert_eq!(TaskExecType::parse("HTTP_CALL"), TaskExecType::HttpCall);
        assert_eq!(TaskExecType::parse("ShElL"), TaskExecType::Shell);
        assert_eq!(TaskExecType::parse("nonsense"), TaskExecType::Local);
    }

    #[test]
    fn extract_dag_body_structured_and_legacy() {
        let mut cfg = TaskConfig::new("outer");
        cfg.exec_params.insert("tasks".into(), r#"[{"id":"a"}]"#.into());
        cfg.exec_params.insert("config".into(), r#"{"max_parallel":2}"#.into());
        let body = extract_dag_body(&cfg).unwrap();
        assert_eq!(body["config"]["max_parallel"], 2);

        let mut legacy = TaskConfig::new("outer");
        legacy.exec_params.insert("dag_json".into(), r#"{"tasks":[{"id":"a"}]}"#.into());
        assert!(extract_dag_body(&legacy).unwrap()["tasks"].is_array());
    }
}
