//! # Toolbridge Core
//!
//! Domain types, traits, and error definitions for the Toolbridge
//! assistant orchestrator. This crate has **no framework dependencies**; it
//! defines the model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Each seam of the system is a trait here:
//! - [`Provider`] is the LLM client (messages + tool schemas in, one turn out)
//! - [`ToolAdapter`] is a source of tools (in-process, subprocess, REST)
//! - [`LocalTool`] is a single in-process plugin
//!
//! Implementations live in their respective crates, so the reasoning loop
//! can be tested with scripted providers and in-memory adapters.

pub mod adapter;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use adapter::{CallContext, ToolAdapter};
pub use error::{AdapterError, Error, ProviderError, Result, ToolError};
pub use event::{DomainEvent, EventBus};
pub use message::{ConversationId, Message, MessageToolCall, Role, Transcript};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use tool::{LocalTool, Tool, ToolDescriptor, ToolOutcome, ToolRegistry};
