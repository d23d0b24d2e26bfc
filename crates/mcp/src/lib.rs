//! Subprocess tool adapter for Toolbridge.
//!
//! Tool servers are child processes that read JSON-RPC 2.0 requests from
//! stdin and write responses to stdout, one JSON object per line. Two
//! methods are used: `tools/list` and `tools/call`.
//!
//! - [`McpAdapter`] spawns a server and exposes its tools through the
//!   `ToolAdapter` trait.
//! - [`serve`] runs the server side over any async reader/writer pair.

pub mod adapter;
pub mod error;
pub mod process;
pub mod protocol;
pub mod server;

pub use adapter::McpAdapter;
pub use error::{McpError, Result};
pub use process::{LaunchSpec, ServerProcess};
pub use protocol::{CallToolParams, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult};
pub use server::serve;
