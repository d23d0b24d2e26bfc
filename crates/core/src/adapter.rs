//! ToolAdapter trait, the abstraction over tool sources.
//!
//! An adapter supplies one or more tools and executes calls to them.
//! Variants: in-process local plugins, a spawned subprocess speaking
//! line-delimited JSON-RPC, and a REST-backed document index.

use crate::error::AdapterError;
use crate::tool::{ToolDescriptor, ToolOutcome};
use async_trait::async_trait;

/// Who is calling a tool, and on behalf of which conversation.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// The invoking user.
    pub user: String,

    /// Conversation the call belongs to, if the shell tracks one.
    pub conversation_id: Option<String>,
}

impl CallContext {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            conversation_id: None,
        }
    }

    pub fn with_conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

/// A pluggable backend that supplies tools.
///
/// Contract: `call_tool` is only meaningful after a successful `connect`.
/// Adapters reconnect transparently when their backend or hosting context
/// went away, instead of failing permanently.
///
/// `call_tool` returns `Ok(ToolOutcome::Failure(..))` for tool-level
/// problems and `Err` for adapter-level ones.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Unique adapter name; registered tools point back to it.
    fn name(&self) -> &str;

    /// Establish the backend. With `force`, reconnect even if already connected.
    async fn connect(&self, force: bool) -> Result<(), AdapterError>;

    /// Enumerate the tools this adapter provides.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, AdapterError>;

    /// Execute one tool call.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        ctx: &CallContext,
    ) -> Result<ToolOutcome, AdapterError>;

    /// Release backend resources. Safe to call repeatedly.
    async fn close(&self);

    /// Whether calls can currently be served.
    fn is_connected(&self) -> bool;
}
