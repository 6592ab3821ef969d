//! Tool argument validation against the JSON-Schema subset
//!
//! Supported keywords: `type`, `properties`, `required`, `enum`,
//! `minimum`, `maximum`, `default`. Unknown keywords are ignored.

use mentat_kernel::agent::error::{AgentError, AgentResult};
use mentat_kernel::agent::types::ToolArgs;
use serde_json::Value;

/// Fill absent properties that declare a `default`.
pub fn apply_defaults(schema: &Value, args: &mut ToolArgs) {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    for (name, prop) in props {
        if args.contains_key(name) {
            continue;
        }
        if let Some(default) = prop.get("default") {
            args.insert(name.clone(), default.clone());
        }
    }
}

/// Validate `args` against `schema`.
pub fn validate_args(
    tool_name: &str,
    schema: &Value,
    args: &ToolArgs,
    max_string_length: usize,
) -> AgentResult<()> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(field) {
                return Err(AgentError::tool_validation(
                    tool_name,
                    format!("missing required field '{field}'"),
                ));
            }
        }
    }

    let props = schema.get("properties").and_then(Value::as_object);
    for (name, value) in args {
        check_string_lengths(tool_name, name, value, max_string_length)?;
        if let Some(prop) = props.and_then(|p| p.get(name)) {
            validate_value(tool_name, name, prop, value)?;
        }
    }
    Ok(())
}

fn validate_value(tool_name: &str, field: &str, prop: &Value, value: &Value) -> AgentResult<()> {
    if let Some(expected) = prop.get("type") {
        let ok = match expected {
            Value::String(t) => type_matches(t, value),
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).any(|t| type_matches(t, value)),
            _ => true,
        };
        if !ok {
            return Err(AgentError::tool_validation(
                tool_name,
                format!("field '{field}' expected type {expected}, got {}", type_name(value)),
            ));
        }
    }

    if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(AgentError::tool_validation(
                tool_name,
                format!("field '{field}' must be one of {}", Value::Array(allowed.clone())),
            ));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = prop.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(AgentError::tool_validation(
                    tool_name,
                    format!("field '{field}' is below minimum {min}"),
                ));
            }
        }
        if let Some(max) = prop.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(AgentError::tool_validation(
                    tool_name,
                    format!("field '{field}' is above maximum {max}"),
                ));
            }
        }
    }

    if let (Some(nested), Value::Object(obj)) = (prop.get("properties"), value) {
        let nested_schema = serde_json::json!({
            "properties": nested,
            "required": prop.get("required").cloned().unwrap_or(Value::Null),
        });
        validate_args(tool_name, &nested_schema, obj, usize::MAX)?;
    }
    Ok(())
}

fn check_string_lengths(tool_name: &str, field: &str, value: &Value, limit: usize) -> AgentResult<()> {
    match value {
        Value::String(s) if s.len() > limit => Err(AgentError::tool_validation(
            tool_name,
            format!("field '{field}' exceeds maximum string length of {limit} bytes"),
        )),
        Value::Array(items) => items
            .iter()
            .try_for_each(|v| check_string_lengths(tool_name, field, v, limit)),
        Value::Object(map) => map
            .values()
            .try_for_each(|v| check_string_lengths(tool_name, field, v, limit)),
        _ => Ok(()),
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mentat_kernel::agent::error::ErrorCode;
    use serde_json::json;

    fn calculator_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {"type": "string", "enum": ["add", "subtract", "multiply", "divide"]},
                "a": {"type": "number"},
                "b": {"type": "number", "minimum": -1000, "maximum": 1000},
                "precision": {"type": "integer", "default": 2}
            },
            "required": ["operation", "a", "b"]
        })
    }

    fn args(v: Value) -> ToolArgs {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_valid_args() {
        let a = args(json!({"operation": "add", "a": 1, "b": 2.5}));
        validate_args("calculator", &calculator_schema(), &a, 1024).unwrap();
    }

    #[test]
    fn test_missing_required() {
        let a = args(json!({"operation": "add", "a": 1}));
        let err = validate_args("calculator", &calculator_schema(), &a, 1024).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ToolValidation);
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn test_type_enum_and_bounds() {
        let schema = calculator_schema();
        let wrong_type = args(json!({"operation": "add", "a": "1", "b": 2}));
        assert!(validate_args("c", &schema, &wrong_type, 1024).is_err());

        let bad_enum = args(json!({"operation": "pow", "a": 1, "b": 2}));
        assert!(validate_args("c", &schema, &bad_enum, 1024).is_err());

        let too_big = args(json!({"operation": "add", "a": 1, "b": 5000}));
        assert!(validate_args("c", &schema, &too_big, 1024).is_err());

        let not_integer = args(json!({"operation": "add", "a": 1, "b": 2, "precision": 1.5}));
        assert!(validate_args("c", &schema, &not_integer, 1024).is_err());
    }

    #[test]
    fn test_string_length_limit() {
        let schema = json!({"type": "object", "properties": {"q": {"type": "string"}}});
        let a = args(json!({"q": "x".repeat(11)}));
        assert!(validate_args("search", &schema, &a, 10).is_err());
        let nested = args(json!({"other": {"deep": ["x".repeat(11)]}}));
        assert!(validate_args("search", &schema, &nested, 10).is_err());
        assert!(validate_args("search", &schema, &a, 11).is_ok());
    }

    #[test]
    fn test_apply_defaults() {
        let mut a = args(json!({"operation": "add", "a": 1, "b": 2}));
        apply_defaults(&calculator_schema(), &mut a);
        assert_eq!(a["precision"], json!(2));
    }
}
