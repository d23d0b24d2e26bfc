//! Serve any [`ToolAdapter`] as a line-delimited JSON-RPC tool server.
//!
//! This is the other end of [`McpAdapter`](crate::McpAdapter): the CLI's
//! `serve-tools` command wraps the local plugins with it so another
//! process can spawn them.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use toolbridge_core::adapter::{CallContext, ToolAdapter};
use toolbridge_core::tool::ToolOutcome;
use tracing::{debug, warn};

use crate::protocol::{
    CallToolParams, JsonRpcError, JsonRpcResponse, ListToolsResult, METHOD_CALL_TOOL,
    METHOD_LIST_TOOLS,
};

/// Answer requests from `reader` on `writer` until `reader` hits EOF.
/// Requests are handled one at a time, in order.
pub async fn serve<R, W>(adapter: &dyn ToolAdapter, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(adapter, &line).await;
        let mut text = serde_json::to_string(&response).map_err(std::io::Error::other)?;
        text.push('\n');
        writer.write_all(text.as_bytes()).await?;
        writer.flush().await?;
    }
    debug!("Tool server input closed");
    Ok(())
}

async fn handle_line(adapter: &dyn ToolAdapter, line: &str) -> JsonRpcResponse {
    let request: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return JsonRpcResponse::failure(
                Value::Null,
                JsonRpcError::new(JsonRpcError::PARSE_ERROR, format!("Parse error: {e}")),
            );
        }
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request["method"].as_str().unwrap_or_default();
    let params = request.get("params").cloned().unwrap_or(Value::Null);

    match method {
        METHOD_LIST_TOOLS => match adapter.list_tools().await {
            Ok(tools) => match serde_json::to_value(ListToolsResult { tools }) {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(e) => internal(id, e.to_string()),
            },
            Err(e) => internal(id, e.to_string()),
        },
        METHOD_CALL_TOOL => {
            let mut call: CallToolParams = match serde_json::from_value(params.clone()) {
                Ok(c) => c,
                Err(e) => {
                    return JsonRpcResponse::failure(
                        id,
                        JsonRpcError::new(JsonRpcError::INVALID_PARAMS, format!("Invalid params: {e}")),
                    );
                }
            };
            if let Value::String(raw) = &call.arguments {
                match serde_json::from_str::<Value>(raw) {
                    Ok(parsed @ Value::Object(_)) => call.arguments = parsed,
                    _ => {
                        return JsonRpcResponse::failure(
                            id,
                            JsonRpcError::new(
                                JsonRpcError::INVALID_PARAMS,
                                "arguments must be a JSON object",
                            ),
                        );
                    }
                }
            } else if call.arguments.is_null() {
                call.arguments = Value::Object(Default::default());
            }

            let user = params["user"].as_str().unwrap_or("tool-client");
            let ctx = CallContext::new(user);
            match adapter.call_tool(&call.name, call.arguments, &ctx).await {
                Ok(ToolOutcome::Success(value)) => JsonRpcResponse::success(id, value),
                Ok(ToolOutcome::Failure(message)) => JsonRpcResponse::failure(
                    id,
                    JsonRpcError::new(JsonRpcError::TOOL_FAILED, message),
                ),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "Tool call failed");
                    JsonRpcResponse::failure(
                        id,
                        JsonRpcError::new(JsonRpcError::TOOL_FAILED, e.to_string()),
                    )
                }
            }
        }
        other => JsonRpcResponse::failure(
            id,
            JsonRpcError::new(
                JsonRpcError::METHOD_NOT_FOUND,
                format!("Unknown method: {other}"),
            ),
        ),
    }
}

fn internal(id: Value, message: String) -> JsonRpcResponse {
    JsonRpcResponse::failure(id, JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, message))
}
