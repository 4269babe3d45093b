//! Tool registry: the catalog of backend data-lake operations.
//!
//! Constructed once at startup, read-only thereafter, and shared across
//! concurrent requests behind an `Arc`. Registration order is preserved so
//! role listings and retrieval tie-breaks are deterministic.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AgentRole;
use crate::error::{RegistryError, SchemaViolation};

/// Expected JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    /// JSON string.
    String,
    /// JSON integer (no fractional part).
    Integer,
    /// JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON array.
    Array,
    /// JSON object.
    Object,
}

impl ParamType {
    /// Returns the string representation used in schemas and prompts.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Whether the given JSON value matches this type.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema for a single tool parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: String,
    /// Expected JSON type.
    pub ty: ParamType,
    /// Whether the parameter must be present.
    pub required: bool,
    /// Human-readable description shown to agents.
    pub description: String,
}

impl ParamSpec {
    /// Creates a required parameter.
    #[must_use]
    pub fn required(name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            description: description.into(),
        }
    }

    /// Creates an optional parameter.
    #[must_use]
    pub fn optional(name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            description: description.into(),
        }
    }
}

/// Immutable description of one backend operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name (unique within the registry).
    pub name: String,
    /// Natural-language description, used for retrieval ranking and prompts.
    pub description: String,
    /// Parameter schema.
    pub parameters: Vec<ParamSpec>,
    /// Description of the payload the backend returns.
    pub output: String,
    /// Agent role that owns this tool.
    pub role: AgentRole,
}

impl ToolDescriptor {
    /// Renders the parameter schema as a compact signature for prompts.
    ///
    /// Example: `find_columns(column: string, limit?: integer)`.
    #[must_use]
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|p| {
                let opt = if p.required { "" } else { "?" };
                format!("{}{opt}: {}", p.name, p.ty)
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

/// Process-wide catalog of backend operations.
///
/// Descriptors live here for the process lifetime. `register` is only
/// called during startup; afterwards the registry is shared read-only.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    // Registration order; the index map points into this.
    descriptors: Vec<ToolDescriptor>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateTool`] if the name is taken.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<(), RegistryError> {
        if self.by_name.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateTool {
                name: descriptor.name,
            });
        }
        self.by_name
            .insert(descriptor.name.clone(), self.descriptors.len());
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Looks a tool up by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownTool`] if absent.
    pub fn lookup(&self, name: &str) -> Result<&ToolDescriptor, RegistryError> {
        self.by_name
            .get(name)
            .map(|&idx| &self.descriptors[idx])
            .ok_or_else(|| RegistryError::UnknownTool {
                name: name.to_string(),
            })
    }

    /// Returns all descriptors for a role, in registration order.
    #[must_use]
    pub fn list_by_role(&self, role: AgentRole) -> Vec<&ToolDescriptor> {
        self.descriptors.iter().filter(|d| d.role == role).collect()
    }

    /// Returns every registered descriptor in registration order.
    #[must_use]
    pub fn all(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Validates arguments against a tool's parameter schema.
    ///
    /// Collects *every* offending field so an agent can correct all of
    /// them in a single retry.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownTool`] for an unregistered name,
    /// [`RegistryError::SchemaViolation`] with the complete violation list.
    pub fn validate_arguments(&self, name: &str, args: &Value) -> Result<(), RegistryError> {
        let descriptor = self.lookup(name)?;

        let mut violations = Vec::new();

        let Some(map) = args.as_object() else {
            return Err(RegistryError::SchemaViolation {
                tool: name.to_string(),
                violations: vec![SchemaViolation {
                    field: "<arguments>".to_string(),
                    problem: format!("expected a JSON object, got {}", json_type_name(args)),
                }],
            });
        };

        for param in &descriptor.parameters {
            match map.get(&param.name) {
                None if param.required => violations.push(SchemaViolation {
                    field: param.name.clone(),
                    problem: "missing required parameter".to_string(),
                }),
                None => {}
                Some(Value::Null) if !param.required => {}
                Some(value) if !param.ty.matches(value) => violations.push(SchemaViolation {
                    field: param.name.clone(),
                    problem: format!(
                        "expected {}, got {}",
                        param.ty,
                        json_type_name(value)
                    ),
                }),
                Some(_) => {}
            }
        }

        for key in map.keys() {
            if !descriptor.parameters.iter().any(|p| &p.name == key) {
                violations.push(SchemaViolation {
                    field: key.clone(),
                    problem: "unknown parameter".to_string(),
                });
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::SchemaViolation {
                tool: name.to_string(),
                violations,
            })
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
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
    use serde_json::json;

    fn descriptor(name: &str, role: AgentRole) -> ToolDescriptor {
        ToolDescriptor {
            name: name.to_string(),
            description: format!("test tool {name}"),
            parameters: vec![
                ParamSpec::required("column", ParamType::String, "column name"),
                ParamSpec::optional("limit", ParamType::Integer, "max results"),
            ],
            output: "a list".to_string(),
            role,
        }
    }

    fn registry() -> ToolRegistry {
        let mut reg = ToolRegistry::new();
        reg.register(descriptor("find_columns", AgentRole::SchemaExplorer))
            .unwrap_or_else(|_| unreachable!());
        reg.register(descriptor("run_query", AgentRole::QueryBuilder))
            .unwrap_or_else(|_| unreachable!());
        reg.register(descriptor("list_schemas", AgentRole::SchemaExplorer))
            .unwrap_or_else(|_| unreachable!());
        reg
    }

    #[test]
    fn test_register_duplicate_fails() {
        let mut reg = registry();
        let result = reg.register(descriptor("find_columns", AgentRole::SchemaExplorer));
        assert!(matches!(
            result,
            Err(RegistryError::DuplicateTool { ref name }) if name == "find_columns"
        ));
    }

    #[test]
    fn test_lookup_unknown_fails() {
        let reg = registry();
        assert!(matches!(
            reg.lookup("missing"),
            Err(RegistryError::UnknownTool { .. })
        ));
    }

    #[test]
    fn test_list_by_role_registration_order() {
        let reg = registry();
        let schema_tools = reg.list_by_role(AgentRole::SchemaExplorer);
        let names: Vec<&str> = schema_tools.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["find_columns", "list_schemas"]);
    }

    #[test]
    fn test_list_by_role_empty() {
        let reg = registry();
        assert!(reg.list_by_role(AgentRole::Analytics).is_empty());
    }

    #[test]
    fn test_validate_arguments_ok() {
        let reg = registry();
        let args = json!({"column": "price", "limit": 10});
        assert!(reg.validate_arguments("find_columns", &args).is_ok());
    }

    #[test]
    fn test_validate_arguments_optional_omitted() {
        let reg = registry();
        let args = json!({"column": "price"});
        assert!(reg.validate_arguments("find_columns", &args).is_ok());
    }

    #[test]
    fn test_validate_arguments_collects_all_violations() {
        let reg = registry();
        // Missing required, wrong type, and an unknown extra — all reported.
        let args = json!({"limit": "ten", "bogus": true});
        let err = reg.validate_arguments("find_columns", &args);
        let Err(RegistryError::SchemaViolation { violations, .. }) = err else {
            unreachable!("expected schema violation");
        };
        assert_eq!(violations.len(), 3);
        let fields: Vec<&str> = violations.iter().map(|v| v.field.as_str()).collect();
        assert!(fields.contains(&"column"));
        assert!(fields.contains(&"limit"));
        assert!(fields.contains(&"bogus"));
    }

    #[test]
    fn test_validate_arguments_non_object() {
        let reg = registry();
        let err = reg.validate_arguments("find_columns", &json!([1, 2]));
        assert!(matches!(err, Err(RegistryError::SchemaViolation { .. })));
    }

    #[test]
    fn test_signature_rendering() {
        let reg = registry();
        let sig = reg
            .lookup("find_columns")
            .unwrap_or_else(|_| unreachable!())
            .signature();
        assert_eq!(sig, "find_columns(column: string, limit?: integer)");
    }
}
