//! Message and Transcript domain types.
//!
//! These are the value objects that flow through an exchange:
//! Session shell supplies history → Bridge builds a transcript → Provider
//! generates turns → tools answer → final assistant turn goes back out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (session).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Optional metadata (tool name, provider info, etc.)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Whether this assistant turn asks for tool execution.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as supplied by the backend. Backends that encode arguments
    /// as text keep the raw string here when it is not valid JSON.
    pub arguments: serde_json::Value,
}

/// The ordered message list exchanged with the model for one exchange.
///
/// Layout: exactly one system turn first, then caller history, then the new
/// user turn, then whatever the reasoning loop appends. Built fresh per
/// exchange and only ever appended to.
#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<Message>,
    exchange_start: usize,
}

impl Transcript {
    /// Build a transcript from a system prompt, prior history and the new user turn.
    ///
    /// System turns inside `history` are dropped so the prompt stays unique.
    pub fn new(system_prompt: impl Into<String>, history: &[Message], user_turn: Message) -> Self {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(system_prompt));
        messages.extend(history.iter().filter(|m| m.role != Role::System).cloned());
        messages.push(user_turn);
        let exchange_start = messages.len();
        Self {
            messages,
            exchange_start,
        }
    }

    /// Append a turn.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// All turns, system first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Turns appended after the new user turn.
    pub fn appended(&self) -> &[Message] {
        &self.messages[self.exchange_start..]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent turn.
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, assistant!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, assistant!");
        assert!(msg.tool_calls.is_empty());
        assert!(!msg.has_tool_calls());
    }

    #[test]
    fn tool_result_references_call_id() {
        let msg = Message::tool_result("call_7", "{\"ok\":true}");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_7"));
    }

    #[test]
    fn message_serialization_roundtrip() {
        let mut msg = Message::assistant("");
        msg.tool_calls.push(MessageToolCall {
            id: "call_1".into(),
            name: "calc".into(),
            arguments: serde_json::json!({"expression": "1+1"}),
        });
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_calls[0].arguments["expression"], "1+1");
        assert_eq!(back.role, Role::Assistant);
    }

    #[test]
    fn transcript_has_single_leading_system_turn() {
        let history = vec![
            Message::system("stale prompt"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let transcript = Transcript::new("fresh prompt", &history, Message::user("next"));

        let systems: Vec<_> = transcript
            .messages()
            .iter()
            .filter(|m| m.role == Role::System)
            .collect();
        assert_eq!(systems.len(), 1);
        assert_eq!(transcript.messages()[0].content, "fresh prompt");
        assert_eq!(transcript.len(), 4);
        assert_eq!(transcript.last().unwrap().content, "next");
    }

    #[test]
    fn appended_only_covers_new_turns() {
        let mut transcript = Transcript::new("sys", &[Message::user("old")], Message::user("new"));
        assert!(transcript.appended().is_empty());

        transcript.push(Message::assistant("answer"));
        assert_eq!(transcript.appended().len(), 1);
        assert_eq!(transcript.appended()[0].content, "answer");
    }
}
