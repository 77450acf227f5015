//! Parameterized task templates: schema types, validation, rendering, and
//! the registration service.

mod renderer;
mod service;
mod validator;

pub use renderer::render;
pub use service::TemplateService;
pub use validator::{validate_and_resolve, FieldError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ErrorCode, Result, TaskHubError};
use crate::store::TemplateRow;

/// Resolved parameter map used during rendering.
pub type ParamMap = serde_json::Map<String, Value>;

/// Declared type of one template parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Int,
    Bool,
    Json,
}

impl ParamType {
    pub fn matches(&self, v: &Value) -> bool {
        match self {
            ParamType::String => v.is_string(),
            ParamType::Int => v.is_i64() || v.is_u64(),
            ParamType::Bool => v.is_boolean(),
            // Json accepts any value, object and scalar alike.
            ParamType::Json => true,
        }
    }
}

/// One entry of a template's parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default_value: Value,
}

/// A reusable parameterized payload: a JSON template plus the schema its
/// parameters must satisfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub template_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub task_json_template: Value,
    #[serde(default)]
    pub schema: Vec<ParamDef>,
}

impl TaskTemplate {
    /// Parse the registration body.
    pub fn from_body(body: &Value) -> Result<TaskTemplate> {
        let tpl: TaskTemplate = serde_json::from_value(body.clone())
            .map_err(|e| TaskHubError::new(ErrorCode::TemplateInvalid, format!("invalid template: {e}")))?;
        if tpl.template_id.is_empty() {
            return Err(TaskHubError::new(ErrorCode::MissingRequiredField, "template_id is required"));
        }
        if !tpl.task_json_template.is_object() {
            return Err(TaskHubError::new(ErrorCode::TemplateInvalid, "task_json_template must be an object"));
        }
        Ok(tpl)
    }

    pub fn from_row(row: &TemplateRow) -> Result<TaskTemplate> {
        Ok(TaskTemplate {
            template_id: row.template_id.clone(),
            name: row.name.clone(),
            description: row.description.clone(),
            task_json_template: serde_json::from_str(&row.task_json_template)?,
            schema: serde_json::from_str(&row.schema_json)?,
        })
    }

    pub fn to_row(&self) -> TemplateRow {
        let now = Utc::now().timestamp_millis();
        TemplateRow {
            template_id: self.template_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            task_json_template: self.task_json_template.to_string(),
            schema_json: serde_json::to_string(&self.schema).unwrap_or_else(|_| "[]".into()),
            created_ts_ms: now,
            updated_ts_ms: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn param_type_matching() {
        assert!(ParamType::String.matches(&json!("x")));
        assert!(!ParamType::String.matches(&json!(1)));
        assert!(ParamType::Int.matches(&json!(42)));
        assert!(!ParamType::Int.matches(&json!(4.2)));
        assert!(ParamType::Bool.matches(&json!(true)));
        assert!(ParamType::Json.matches(&json!({"a": 1})));
        assert!(ParamType::Json.matches(&json!("scalar")));
    }

    #[test]
    fn template_body_round_trip_through_row() {
        let body = json!({
            "template_id": "tpl-1",
            "name": "demo",
            "task_json_template": {"task": {"id": "t", "exec_type": "Shell"}},
            "schema": [
                {"name": "msg", "type": "string", "required": true},
                {"name": "timeout_ms", "type": "int", "default_value": 5000}
            ]
        });
        let tpl = TaskTemplate::from_body(&body).unwrap();
        assert_eq!(tpl.schema.len(), 2);
        assert!(tpl.schema[0].required);

        let row = tpl.to_row();
        let back = TaskTemplate::from_row(&row).unwrap();
        assert_eq!(back.template_id, "tpl-1");
        assert_eq!(back.schema[1].default_value, json!(5000));
    }

    #[test]
    fn missing_id_rejected() {
        let body = json!({"template_id": "", "task_json_template": {}});
        assert!(TaskTemplate::from_body(&body).is_err());
    }
}
