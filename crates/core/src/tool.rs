//! Tool domain types: descriptors, registry, outcomes, and the local plugin trait.
//!
//! A [`Tool`] is a registered capability: what the model sees (name,
//! description, schema) plus which adapter executes it and an optional
//! display glyph. The registry is owned by one bridge and written only
//! during adapter initialization.

use crate::adapter::CallContext;
use crate::error::ToolError;
use crate::provider::ToolDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A tool as listed by an adapter, before it is bound to that adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// JSON-Schema-like parameter schema.
    #[serde(
        rename = "inputSchema",
        alias = "input_schema",
        alias = "parameters",
        default = "empty_object_schema"
    )]
    pub input_schema: serde_json::Value,

    /// Short UI marker shown while the tool runs.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "emoji")]
    pub glyph: Option<String>,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// A registered tool: descriptor plus the adapter that executes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    /// Name of the owning adapter.
    pub adapter: String,
    pub glyph: Option<String>,
}

impl Tool {
    /// Bind a listed descriptor to its owning adapter.
    pub fn from_descriptor(descriptor: ToolDescriptor, adapter: impl Into<String>) -> Self {
        Self {
            name: descriptor.name,
            description: descriptor.description,
            input_schema: descriptor.input_schema,
            adapter: adapter.into(),
            glyph: descriptor.glyph,
        }
    }

    /// The definition sent to the LLM.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }

    /// Glyph if present, otherwise the tool name.
    pub fn display_label(&self) -> &str {
        self.glyph.as_deref().unwrap_or(&self.name)
    }
}

/// Result of executing a tool: either a value or a failure message.
///
/// Adapters return this for tool-level problems so the loop can absorb
/// them into the transcript with a plain match.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(serde_json::Value),
    Failure(String),
}

impl ToolOutcome {
    pub fn success(value: impl Into<serde_json::Value>) -> Self {
        Self::Success(value.into())
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Render for a tool-result turn. Failures become `{"error": message}`.
    pub fn to_transcript_content(&self) -> String {
        match self {
            Self::Success(serde_json::Value::String(text)) => text.clone(),
            Self::Success(value) => value.to_string(),
            Self::Failure(message) => serde_json::json!({ "error": message }).to_string(),
        }
    }
}

impl From<ToolError> for ToolOutcome {
    fn from(err: ToolError) -> Self {
        Self::Failure(err.to_string())
    }
}

/// An in-process tool plugin.
///
/// Local plugins are listed in a static table by the local adapter; each
/// receives the caller context and the structured arguments.
#[async_trait]
pub trait LocalTool: Send + Sync {
    /// The unique name of this tool (e.g., "calc").
    fn name(&self) -> &str;

    /// Human-readable description (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Optional display glyph.
    fn glyph(&self) -> Option<&str> {
        None
    }

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        ctx: &CallContext,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError>;

    /// The descriptor an adapter lists for this plugin.
    fn to_descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters_schema(),
            glyph: self.glyph().map(str::to_string),
        }
    }
}

/// Mapping from tool name to [`Tool`], iterated in registration order.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tool. A duplicate name replaces the earlier entry in place.
    pub fn register(&mut self, tool: Tool) {
        match self.index.get(&tool.name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index.insert(tool.name.clone(), self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.index.get(name).map(|&slot| &self.tools[slot])
    }

    /// All registered tools.
    pub fn all(&self) -> &[Tool] {
        &self.tools
    }

    /// Definitions for every registered tool, for the LLM request.
    pub fn schemas(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(Tool::to_definition).collect()
    }

    /// Names of registered tools.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.tools.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, adapter: &str) -> Tool {
        Tool {
            name: name.into(),
            description: format!("{name} tool"),
            input_schema: empty_object_schema(),
            adapter: adapter.into(),
            glyph: None,
        }
    }

    struct EchoTool;

    #[async_trait]
    impl LocalTool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes input back"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "message": { "type": "string" } }
            })
        }
        fn glyph(&self) -> Option<&str> {
            Some("📣")
        }
        async fn execute(
            &self,
            _ctx: &CallContext,
            arguments: serde_json::Value,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(arguments["message"].clone())
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("calc", "local"));
        assert!(registry.get("calc").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_name_last_registration_wins() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("search", "local"));
        registry.register(tool("other", "local"));
        registry.register(tool("search", "github-mcp"));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("search").unwrap().adapter, "github-mcp");
        assert_eq!(registry.names(), vec!["search", "other"]);
    }

    #[test]
    fn schemas_follow_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(tool("b", "local"));
        registry.register(tool("a", "local"));
        let names: Vec<_> = registry.schemas().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn descriptor_accepts_wire_schema_key() {
        let descriptor: ToolDescriptor = serde_json::from_value(serde_json::json!({
            "name": "lookup",
            "description": "Look something up",
            "inputSchema": { "type": "object", "properties": { "q": { "type": "string" } } }
        }))
        .unwrap();
        assert_eq!(descriptor.input_schema["properties"]["q"]["type"], "string");
        assert!(descriptor.glyph.is_none());

        let bare: ToolDescriptor = serde_json::from_value(serde_json::json!({"name": "x"})).unwrap();
        assert_eq!(bare.input_schema["type"], "object");
    }

    #[test]
    fn outcome_rendering() {
        assert_eq!(ToolOutcome::success("done").to_transcript_content(), "done");
        assert_eq!(
            ToolOutcome::success(serde_json::json!({"n": 2})).to_transcript_content(),
            r#"{"n":2}"#
        );
        let failure: serde_json::Value =
            serde_json::from_str(&ToolOutcome::failure("boom").to_transcript_content()).unwrap();
        assert_eq!(failure["error"], "boom");
    }

    #[test]
    fn display_label_prefers_glyph() {
        let mut t = tool("calc", "local");
        assert_eq!(t.display_label(), "calc");
        t.glyph = Some("🧮".into());
        assert_eq!(t.display_label(), "🧮");
    }

    #[tokio::test]
    async fn local_tool_descriptor_and_execution() {
        let echo = EchoTool;
        let descriptor = echo.to_descriptor();
        assert_eq!(descriptor.name, "echo");
        assert_eq!(descriptor.glyph.as_deref(), Some("📣"));

        let bound = Tool::from_descriptor(descriptor, "local");
        assert_eq!(bound.adapter, "local");

        let out = echo
            .execute(&CallContext::new("ada"), serde_json::json!({"message": "hi"}))
            .await
            .unwrap();
        assert_eq!(out, "hi");
    }
}
