//! External tools the model can call.
//!
//! [`ToolInvoker`] is the seam between the tool-call loop and whatever
//! actually runs the tools.  [`McpToolbox`] runs them on Model Context
//! Protocol servers over stdio; [`NoTools`] is used when none are configured.

pub mod mcp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use mcp::{McpSession, McpToolbox, ServerParams, ServersFile};

// ---------------------------------------------------------------------------
// ToolSpec
// ---------------------------------------------------------------------------

/// A tool as declared to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments object.
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

// ---------------------------------------------------------------------------
// ToolError
// ---------------------------------------------------------------------------

/// Why a tool call produced no result.
///
/// The tool-call loop never propagates these; their `Display` text is handed
/// back to the model as the tool's response.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("failed to start tool server {server}: {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tool server I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tool server protocol error: {0}")]
    Protocol(String),

    #[error("tool call timed out")]
    Timeout,

    /// The tool ran and reported an error.
    #[error("{0}")]
    Failed(String),

    #[error("invalid tool server list: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// ToolInvoker trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Tools available for the model to call.
    fn tools(&self) -> Vec<ToolSpec>;

    /// Run `name` with `args` and return its result rendered as text.
    async fn call_tool(&self, name: &str, args: &Value) -> Result<String, ToolError>;
}

/// Invoker with no tools; every call is [`ToolError::UnknownTool`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTools;

#[async_trait]
impl ToolInvoker for NoTools {
    fn tools(&self) -> Vec<ToolSpec> {
        Vec::new()
    }

    async fn call_tool(&self, name: &str, _args: &Value) -> Result<String, ToolError> {
        Err(ToolError::UnknownTool(name.to_string()))
    }
}

/// Render a JSON tool result the way it is shown to the model: strings
/// verbatim, everything else as compact JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// MockToolInvoker  (test-only)
// ---------------------------------------------------------------------------

/// Answers calls from a fixed table and records every call.
#[cfg(test)]
pub struct MockToolInvoker {
    results: std::collections::HashMap<String, Result<String, String>>,
    calls: std::sync::Mutex<Vec<(String, Value)>>,
}

#[cfg(test)]
impl MockToolInvoker {
    pub fn new() -> Self {
        Self {
            results: Default::default(),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn with_ok(mut self, name: &str, result: &str) -> Self {
        self.results.insert(name.into(), Ok(result.into()));
        self
    }

    pub fn with_err(mut self, name: &str, message: &str) -> Self {
        self.results.insert(name.into(), Err(message.into()));
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ToolInvoker for MockToolInvoker {
    fn tools(&self) -> Vec<ToolSpec> {
        let mut names: Vec<&String> = self.results.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| ToolSpec {
                name: name.clone(),
                description: format!("mock {name}"),
                input_schema: empty_object_schema(),
            })
            .collect()
    }

    async fn call_tool(&self, name: &str, args: &Value) -> Result<String, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), args.clone()));
        match self.results.get(name) {
            Some(Ok(result)) => Ok(result.clone()),
            Some(Err(message)) => Err(ToolError::Failed(message.clone())),
            None => Err(ToolError::UnknownTool(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_spec_reads_mcp_field_names() {
        let spec: ToolSpec = serde_json::from_value(serde_json::json!({
            "name": "add_card",
            "description": "Add an Anki card",
            "inputSchema": { "type": "object", "properties": { "front": { "type": "string" } } }
        }))
        .unwrap();
        assert_eq!(spec.name, "add_card");
        assert_eq!(spec.input_schema["properties"]["front"]["type"], "string");
    }

    #[test]
    fn tool_spec_defaults_missing_schema() {
        let spec: ToolSpec = serde_json::from_value(serde_json::json!({ "name": "ping" })).unwrap();
        assert_eq!(spec.description, "");
        assert_eq!(spec.input_schema["type"], "object");
    }

    #[test]
    fn render_value_keeps_strings_verbatim() {
        assert_eq!(render_value(&Value::String("done".into())), "done");
        assert_eq!(render_value(&serde_json::json!({"n": 1})), r#"{"n":1}"#);
        assert_eq!(render_value(&serde_json::json!(3)), "3");
    }

    #[tokio::test]
    async fn no_tools_rejects_every_call() {
        let err = NoTools.call_tool("x", &Value::Null).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
        assert!(NoTools.tools().is_empty());
    }

    #[test]
    fn failed_tool_error_displays_message_only() {
        assert_eq!(ToolError::Failed("deck not found".into()).to_string(), "deck not found");
    }
}
