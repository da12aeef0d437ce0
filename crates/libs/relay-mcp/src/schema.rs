//! Tool schema generation for the two tools Relay exposes over JSON-RPC
//! (spec.md §4.10 `tools/list`).
//!
//! Generates [`ToolSchema`] from `schemars::JsonSchema`-deriving parameter
//! structs, the same way the teacher keeps its tool parameter structs as the
//! single source of truth for schema + documentation instead of hand-writing
//! a JSON Schema literal per tool.

use schemars::{JsonSchema, schema_for};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct ParameterSchema {
    pub name: String,
    pub param_type: String,
    pub required: bool,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterSchema>,
}

/// Parameters for the `check_status` tool (spec.md §6.1 request body).
#[derive(Debug, JsonSchema)]
pub struct CheckStatusParams {
    /// Repository URL, any of the https/ssh/bare forms Relay normalizes.
    pub repo_url: String,
    /// Branch name the caller is working against.
    pub branch: String,
    /// Repo-relative paths the caller intends to touch or is asking about.
    pub file_paths: Vec<String>,
    /// Commit sha the caller's working tree is currently based on.
    pub agent_head: String,
}

/// Parameters for the `post_status` tool (spec.md §6.2 request body).
#[derive(Debug, JsonSchema)]
pub struct PostStatusParams {
    /// Repository URL, any of the https/ssh/bare forms Relay normalizes.
    pub repo_url: String,
    /// Branch name the caller is working against.
    pub branch: String,
    /// Repo-relative paths the status applies to.
    pub file_paths: Vec<String>,
    /// One of `OPEN`, `READING`, `WRITING`.
    pub status: String,
    /// Free-text note attached to any lock created by this call.
    pub message: String,
    /// Required for `WRITING`/`READING`; the caller's current head commit.
    pub agent_head: Option<String>,
    /// Compared against `agent_head` to detect an `OPEN` with no push yet.
    pub new_repo_head: Option<String>,
}

/// Builds a [`ToolSchema`] from a type implementing `JsonSchema`. `Option<T>`
/// fields become optional parameters; all others are required.
pub fn schema_from_params<T: JsonSchema>(name: &str, description: &str) -> ToolSchema {
    let schema = schema_for!(T);
    let json_value = serde_json::to_value(schema).unwrap_or(Value::Null);

    let mut parameters = Vec::new();

    if let Value::Object(root) = &json_value {
        let properties = root.get("properties").and_then(|v| v.as_object());
        let required = root
            .get("required")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .collect::<std::collections::HashSet<_>>()
            })
            .unwrap_or_default();

        if let Some(props) = properties {
            for (field_name, field_schema) in props {
                let param_type = extract_type(field_schema);
                let description = extract_description(field_schema);
                let is_required = required.contains(field_name.as_str());

                parameters.push(ParameterSchema {
                    name: field_name.clone(),
                    param_type,
                    required: is_required,
                    description,
                });
            }
        }
    }

    parameters.sort_by(|a, b| a.name.cmp(&b.name));

    ToolSchema {
        name: name.into(),
        description: description.into(),
        parameters,
    }
}

fn extract_type(schema: &Value) -> String {
    if let Value::Object(obj) = schema {
        if let Some(Value::String(t)) = obj.get("type") {
            return t.clone();
        }
        if let Some(Value::Array(types)) = obj.get("type") {
            for t in types {
                if let Value::String(s) = t {
                    if s != "null" {
                        return s.clone();
                    }
                }
            }
        }
        if let Some(Value::Array(any_of)) = obj.get("anyOf") {
            for variant in any_of {
                if let Value::Object(v) = variant {
                    if let Some(Value::String(t)) = v.get("type") {
                        if t != "null" {
                            return t.clone();
                        }
                    }
                }
            }
        }
    }
    "string".into()
}

fn extract_description(schema: &Value) -> String {
    if let Value::Object(obj) = schema {
        if let Some(Value::String(desc)) = obj.get("description") {
            return desc.clone();
        }
        if let Some(Value::Array(any_of)) = obj.get("anyOf") {
            for variant in any_of {
                if let Value::Object(v) = variant {
                    if let Some(Value::String(desc)) = v.get("description") {
                        return desc.clone();
                    }
                }
            }
        }
    }
    String::new()
}

/// Both tool schemas Relay exposes, in `tools/list` order.
pub fn tool_schemas() -> Vec<ToolSchema> {
    vec![
        schema_from_params::<CheckStatusParams>(
            "check_status",
            "Check whether the caller's working tree is current and whether any of the named files (or their dependents) are locked by someone else.",
        ),
        schema_from_params::<PostStatusParams>(
            "post_status",
            "Declare intent (OPEN/READING/WRITING) on a set of files, acquiring or releasing locks as appropriate.",
        ),
    ]
}
