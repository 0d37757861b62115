//! Tool parameter schemas.

use serde::{Deserialize, Serialize};

/// JSON Schema-based parameter definition for a tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentToolParameters {
    /// JSON Schema object describing the parameters.
    pub schema: serde_json::Value,
}

impl AgentToolParameters {
    /// Create from a raw JSON Schema value.
    pub fn from_schema(schema: serde_json::Value) -> Self {
        Self { schema }
    }

    /// Create an empty parameter schema (no parameters).
    pub fn empty() -> Self {
        Self {
            schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
        }
    }

    /// Builder: create an object schema with properties.
    pub fn object() -> ParameterBuilder {
        ParameterBuilder {
            properties: serde_json::Map::new(),
            required: Vec::new(),
        }
    }

    /// Names of the declared properties.
    pub fn property_names(&self) -> Vec<&str> {
        self.schema
            .get("properties")
            .and_then(|p| p.as_object())
            .map(|p| p.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// Builder for constructing tool parameter schemas.
pub struct ParameterBuilder {
    properties: serde_json::Map<String, serde_json::Value>,
    required: Vec<String>,
}

impl ParameterBuilder {
    fn property(mut self, name: impl Into<String>, schema: serde_json::Value, required: bool) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), schema);
        if required {
            self.required.push(name);
        }
        self
    }

    /// Add a string property.
    pub fn string(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = serde_json::json!({
            "type": "string",
            "description": description.into(),
        });
        self.property(name, schema, required)
    }

    /// Add a required string property that may be `null`.
    pub fn nullable_string(self, name: impl Into<String>, description: impl Into<String>) -> Self {
        let schema = serde_json::json!({
            "type": ["string", "null"],
            "description": description.into(),
        });
        self.property(name, schema, true)
    }

    /// Add a number property.
    pub fn number(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = serde_json::json!({
            "type": "number",
            "description": description.into(),
        });
        self.property(name, schema, required)
    }

    /// Add a boolean property.
    pub fn boolean(self, name: impl Into<String>, description: impl Into<String>, required: bool) -> Self {
        let schema = serde_json::json!({
            "type": "boolean",
            "description": description.into(),
        });
        self.property(name, schema, required)
    }

    /// Add an optional property whose shape is unknown.
    pub fn any(self, name: impl Into<String>) -> Self {
        self.property(name, serde_json::json!({}), false)
    }

    /// Build into AgentToolParameters.
    pub fn build(self) -> AgentToolParameters {
        AgentToolParameters {
            schema: serde_json::json!({
                "type": "object",
                "properties": self.properties,
                "required": self.required,
            }),
        }
    }
}
