//! Validate tool call arguments against JSON Schema before execution.

/// Validate tool arguments against a JSON Schema.
///
/// Performs top-level validation: schema type check, required field presence,
/// and property type verification. Properties without a `type` (the shape
/// used for discovered tools) accept any value.
pub fn validate_arguments(
    args: &serde_json::Value,
    schema: &serde_json::Value,
) -> Result<(), String> {
    if schema.get("type").and_then(|v| v.as_str()) == Some("object") && !args.is_object() {
        return Err(format!(
            "expected object arguments, got {}",
            json_type_name(args)
        ));
    }

    let Some(obj) = args.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for name in required.iter().filter_map(|f| f.as_str()) {
            if !obj.contains_key(name) {
                return Err(format!("missing required field '{name}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
        for (key, value) in obj {
            let Some(expected) = properties.get(key).and_then(|p| p.get("type")) else {
                continue;
            };
            if !type_matches(value, expected) {
                return Err(format!(
                    "field '{}' expected type '{}', got {}",
                    key,
                    describe_type(expected),
                    json_type_name(value)
                ));
            }
        }
    }

    Ok(())
}

fn type_matches(value: &serde_json::Value, expected: &serde_json::Value) -> bool {
    match expected {
        serde_json::Value::String(name) => value_matches_type(value, name),
        serde_json::Value::Array(names) => names
            .iter()
            .filter_map(|n| n.as_str())
            .any(|name| value_matches_type(value, name)),
        _ => true,
    }
}

fn describe_type(expected: &serde_json::Value) -> String {
    match expected {
        serde_json::Value::String(name) => name.clone(),
        serde_json::Value::Array(names) => names
            .iter()
            .filter_map(|n| n.as_str())
            .collect::<Vec<_>>()
            .join(" | "),
        other => other.to_string(),
    }
}

fn value_matches_type(value: &serde_json::Value, expected: &str) -> bool {
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

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
