//! Tool metadata and call/result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Functional grouping of the engine tools, used by the planner to pick
/// candidate tools for a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Process,
    Memory,
    Scan,
    Debug,
    Analysis,
    Pointer,
    Lua,
    Dbvm,
}

/// Declared type of a tool parameter. Used for validation and coercion of
/// incoming arguments before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Integer,
    String,
    List,
    Boolean,
}

/// A single declared parameter of a tool.
///
/// A required parameter never carries a default; optional parameters may.
/// The constructors enforce this, so metadata built through them cannot
/// express the contradictory combination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub description: String,
}

impl Parameter {
    /// A required parameter. Required parameters have no default.
    pub fn required(
        name: impl Into<String>,
        param_type: ParamType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            default: None,
            description: description.into(),
        }
    }

    /// An optional parameter, with or without a default. An absent optional
    /// without a default is simply omitted from the dispatched arguments.
    pub fn optional(
        name: impl Into<String>,
        param_type: ParamType,
        default: impl Into<Option<Value>>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            default: default.into(),
            description: description.into(),
        }
    }
}

/// Static description of a tool: what it is called, what it needs, and how
/// the permission policy treats it. Immutable after registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub parameters: Vec<Parameter>,
    /// Usage examples shown in tool listings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    /// Per-tool deadline in seconds, overriding the executor default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    /// Destructive tools mutate the target process.
    pub destructive: bool,
    /// A destructive tool runs only through the approval path; one without
    /// this flag is blocked unconditionally.
    pub requires_approval: bool,
}

impl ToolMetadata {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
        parameters: Vec<Parameter>,
        destructive: bool,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category,
            parameters,
            examples: Vec::new(),
            timeout: None,
            destructive,
            requires_approval: destructive,
        }
    }

    pub fn with_examples(mut self, examples: Vec<String>) -> Self {
        self.examples = examples;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: f64) -> Self {
        self.timeout = Some(timeout_secs);
        self
    }

    pub fn with_requires_approval(mut self, requires_approval: bool) -> Self {
        self.requires_approval = requires_approval;
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// A request to run one tool with concrete arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub parameters: HashMap<String, Value>,
    /// Per-call deadline in seconds; falls back to the executor default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<f64>,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, parameters: HashMap<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
            timeout_secs: None,
        }
    }
}

/// Outcome of one tool execution. Failures are data, not errors: the
/// executor always yields a `ToolResult` so a batch never aborts early.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub tool_name: String,
    pub parameters: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time: f64,
    pub timestamp: DateTime<Utc>,
}

impl ToolResult {
    pub fn ok(
        tool_name: impl Into<String>,
        parameters: HashMap<String, Value>,
        result: Value,
        execution_time: f64,
    ) -> Self {
        Self {
            success: true,
            tool_name: tool_name.into(),
            parameters,
            result: Some(result),
            error: None,
            execution_time,
            timestamp: Utc::now(),
        }
    }

    pub fn err(
        tool_name: impl Into<String>,
        parameters: HashMap<String, Value>,
        error: impl Into<String>,
        execution_time: f64,
    ) -> Self {
        Self {
            success: false,
            tool_name: tool_name.into(),
            parameters,
            result: None,
            error: Some(error.into()),
            execution_time,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_parameter_has_no_default() {
        let p = Parameter::required("address", ParamType::Integer, "target address");
        assert!(p.required);
        assert!(p.default.is_none());
    }

    #[test]
    fn optional_parameter_carries_default() {
        let p = Parameter::optional("size", ParamType::Integer, json!(16), "bytes to read");
        assert!(!p.required);
        assert_eq!(p.default, Some(json!(16)));
    }

    #[test]
    fn destructive_metadata_requires_approval_by_default() {
        let m = ToolMetadata::new("write_memory", "write", ToolCategory::Memory, vec![], true);
        assert!(m.requires_approval);

        let unapproved = m.clone().with_requires_approval(false);
        assert!(unapproved.destructive && !unapproved.requires_approval);
    }

    #[test]
    fn failed_result_is_data() {
        let r = ToolResult::err("read_memory", HashMap::new(), "bad address", 0.01);
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("bad address"));
        assert!(r.result.is_none());
    }
}
