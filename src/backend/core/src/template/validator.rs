//! Template parameter validation and default resolution.

use super::{ParamDef, ParamMap};

/// One validation failure, reported as `<field>: <message>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check `input` against the schema and fill defaults for missing optional
/// parameters. Returns the resolved map or every violation found.
pub fn validate_and_resolve(schema: &[ParamDef], input: &ParamMap) -> Result<ParamMap, Vec<FieldError>> {
    let mut resolved = input.clone();
    let mut errors = Vec::new();

    for def in schema {
        match input.get(&def.name) {
            None => {
                if def.required {
                    errors.push(FieldError { field: def.name.clone(), message: "required".into() });
                    continue;
                }
                if !def.default_value.is_null() {
                    resolved.insert(def.name.clone(), def.default_value.clone());
                }
            }
            Some(value) => {
                if !def.param_type.matches(value) {
                    errors.push(FieldError { field: def.name.clone(), message: "type mismatch".into() });
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(resolved)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ParamType;
    use serde_json::json;

    fn schema() -> Vec<ParamDef> {
        vec![
            ParamDef { name: "msg".into(), param_type: ParamType::String, required: true, default_value: json!(null) },
            ParamDef {
                name: "timeout_ms".into(),
                param_type: ParamType::Int,
                required: false,
                default_value: json!(5000),
            },
        ]
    }

    #[test]
    fn defaults_injected_for_missing_optionals() {
        let mut input = ParamMap::new();
        input.insert("msg".into(), json!("hi"));
        let resolved = validate_and_resolve(&schema(), &input).unwrap();
        assert_eq!(resolved["timeout_ms"], json!(5000));
    }

    #[test]
    fn missing_required_reported() {
        let errors = validate_and_resolve(&schema(), &ParamMap::new()).unwrap_err();
        assert_eq!(errors[0].to_string(), "msg: required");
    }

    #[test]
    fn type_mismatch_reported() {
        let mut input = ParamMap::new();
        input.insert("msg".into(), json!("hi"));
        input.insert("timeout_ms".into(), json!("not an int"));
        let errors = validate_and_resolve(&schema(), &input).unwrap_err();
        assert_eq!(errors[0].field, "timeout_ms");
        assert_eq!(errors[0].message, "type mismatch");
    }

    #[test]
    fn provided_values_win_over_defaults() {
        let mut input = ParamMap::new();
        input.insert("msg".into(), json!("hi"));
        input.insert("timeout_ms".into(), json!(100));
        let resolved = validate_and_resolve(&schema(), &input).unwrap();
        assert_eq!(resolved["timeout_ms"], json!(100));
    }
}
