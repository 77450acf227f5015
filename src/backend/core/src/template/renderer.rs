//! Template rendering: typed `$param` injection and `{{key}}` string
//! substitution over a JSON template.

use serde_json::{Map, Value};

use super::{validate_and_resolve, ParamMap, TaskTemplate};
use crate::error::{ErrorCode, Result, TaskHubError};
use crate::task::parse_task_config;

/// Render `template` with `input`, validating parameters first.
///
/// The result is either a single task envelope (`{task: {...}}` or a bare
/// task object) or a DAG envelope (`{config, tasks}`). Single-task output
/// is eagerly validated so a broken template fails at render time, not at
/// dispatch.
pub fn render(template: &TaskTemplate, input: &ParamMap) -> Result<Value> {
    let resolved = validate_and_resolve(&template.schema, input).map_err(|errors| {
        let msg = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
        TaskHubError::new(ErrorCode::TemplateInvalid, msg)
    })?;

    let rendered = render_node(&template.task_json_template, &resolved)?;

    // DAG envelope: structure is validated later by the DAG builder.
    if rendered.get("tasks").map(Value::is_array).unwrap_or(false) {
        return Ok(rendered);
    }

    let task = match rendered.get("task") {
        Some(t) if t.is_object() => t,
        _ => &rendered,
    };
    if let Some(exec_type) = task.get("exec_type") {
        let Some(s) = exec_type.as_str() else {
            return Err(TaskHubError::new(ErrorCode::TemplateInvalid, "exec_type must be string"));
        };
        let normalized = s.to_ascii_lowercase();
        if !matches!(normalized.as_str(), "local" | "remote" | "script" | "httpcall" | "http_call" | "http" | "shell")
        {
            return Err(TaskHubError::new(ErrorCode::TemplateInvalid, format!("invalid exec_type: {s}")));
        }
    }
    parse_task_config(&rendered)?;

    Ok(rendered)
}

/// `{"$param": "path"}` objects inject the raw parameter value, keeping
/// its JSON type.
fn param_inject_path(node: &Map<String, Value>) -> Option<&str> {
    if node.len() != 1 {
        return None;
    }
    node.get("$param").and_then(Value::as_str)
}

/// Dot-notation lookup into the resolved params (`retry.count` navigates
/// nested objects).
fn resolve_param_path(resolved: &ParamMap, path: &str) -> Result<Value> {
    let mut parts = path.split('.');
    let first = parts.next().filter(|p| !p.is_empty()).ok_or_else(|| {
        TaskHubError::new(ErrorCode::TemplateInvalid, "empty param path")
    })?;

    let mut current = resolved
        .get(first)
        .ok_or_else(|| TaskHubError::new(ErrorCode::TemplateInvalid, format!("missing param: {first}")))?
        .clone();

    for part in parts {
        let obj = current
            .as_object()
            .ok_or_else(|| TaskHubError::new(ErrorCode::TemplateInvalid, format!("param is not object: {part}")))?;
        current = obj
            .get(part)
            .ok_or_else(|| TaskHubError::new(ErrorCode::TemplateInvalid, format!("missing param field: {part}")))?
            .clone();
    }
    Ok(current)
}

fn render_node(node: &Value, resolved: &ParamMap) -> Result<Value> {
    match node {
        Value::Object(map) => {
            if let Some(path) = param_inject_path(map) {
                return resolve_param_path(resolved, path);
            }
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_node(v, resolved)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(render_node(item, resolved)?);
            }
            Ok(Value::Array(out))
        }
        Value::String(s) => Ok(Value::String(render_string(s, resolved)?)),
        scalar => Ok(scalar.clone()),
    }
}

fn param_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Substitute every `{{key}}` / `{{param.path}}` placeholder with the
/// stringified parameter value. Unterminated placeholders pass through
/// verbatim.
fn render_string(s: &str, resolved: &ParamMap) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };

        let key = after[..end].trim();
        let value = if key.contains('.') {
            resolve_param_path(resolved, key)?
        } else {
            resolved
                .get(key)
                .ok_or_else(|| TaskHubError::new(ErrorCode::TemplateInvalid, format!("missing param: {key}")))?
                .clone()
        };
        out.push_str(&param_to_string(&value));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{ParamDef, ParamType};
    use serde_json::json;

    fn template(body: Value, schema: Vec<ParamDef>) -> TaskTemplate {
        TaskTemplate {
            template_id: "tpl".into(),
            name: "tpl".into(),
            description: String::new(),
            task_json_template: body,
            schema,
        }
    }

    fn params(pairs: &[(&str, Value)]) -> ParamMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn typed_injection_preserves_json_types() {
        let tpl = template(
            json!({"task": {
                "id": "t",
                "exec_type": "Shell",
                "exec_command": "echo {{msg}}",
                "timeout_ms": {"$param": "timeout_ms"},
            }}),
            vec![
                ParamDef { name: "msg".into(), param_type: ParamType::String, required: true, default_value: json!(null) },
                ParamDef {
                    name: "timeout_ms".into(),
                    param_type: ParamType::Int,
                    required: false,
                    default_value: json!(5000),
                },
            ],
        );

        let rendered = render(&tpl, &params(&[("msg", json!("hi"))])).unwrap();
        assert_eq!(rendered["task"]["timeout_ms"], json!(5000));
        assert!(rendered["task"]["timeout_ms"].is_i64() || rendered["task"]["timeout_ms"].is_u64());
        assert_eq!(rendered["task"]["exec_command"], "echo hi");
    }

    #[test]
    fn missing_required_param_is_reported_by_name() {
        let tpl = template(
            json!({"task": {"id": "t", "exec_command": "echo {{msg}}"}}),
            vec![ParamDef { name: "msg".into(), param_type: ParamType::String, required: true, default_value: json!(null) }],
        );
        let err = render(&tpl, &ParamMap::new()).unwrap_err();
        assert!(err.message().contains("msg: required"));
    }

    #[test]
    fn dot_path_navigates_nested_params() {
        let tpl = template(
            json!({"task": {"id": "t", "exec_command": "run --count {{opts.count}}", "flags": {"$param": "opts.flags"}}}),
            vec![ParamDef { name: "opts".into(), param_type: ParamType::Json, required: true, default_value: json!(null) }],
        );
        let rendered =
            render(&tpl, &params(&[("opts", json!({"count": 3, "flags": {"fast": true}}))])).unwrap();
        assert_eq!(rendered["task"]["exec_command"], "run --count 3");
        assert_eq!(rendered["task"]["flags"], json!({"fast": true}));
    }

    #[test]
    fn dag_envelope_skips_task_validation() {
        let tpl = template(
            json!({"config": {"max_parallel": 2}, "tasks": [{"id": "a"}, {"id": "b", "deps": ["a"]}]}),
            vec![],
        );
        let rendered = render(&tpl, &ParamMap::new()).unwrap();
        assert_eq!(rendered["tasks"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn invalid_exec_type_rejected_for_single_task() {
        let tpl = template(json!({"task": {"id": "t", "exec_type": "Dag"}}), vec![]);
        let err = render(&tpl, &ParamMap::new()).unwrap_err();
        assert!(err.message().contains("invalid exec_type"));
    }

    #[test]
    fn non_scalar_placeholder_renders_as_json_dump() {
        let tpl = template(
            json!({"task": {"id": "t", "exec_command": "use {{cfg}}"}}),
            vec![ParamDef { name: "cfg".into(), param_type: ParamType::Json, required: true, default_value: json!(null) }],
        );
        let rendered = render(&tpl, &params(&[("cfg", json!({"a": 1}))])).unwrap();
        assert_eq!(rendered["task"]["exec_command"], r#"use {"a":1}"#);
    }
}
