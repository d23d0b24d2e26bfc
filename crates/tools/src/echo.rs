//! `echo`: relays a message back to the user.

use async_trait::async_trait;
use toolbridge_core::adapter::CallContext;
use toolbridge_core::error::ToolError;
use toolbridge_core::tool::LocalTool;
use tracing::info;

pub struct EchoTool;

#[async_trait]
impl LocalTool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Output a message to the user."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": { "type": "string" }
            },
            "required": ["message"]
        })
    }

    fn glyph(&self) -> Option<&str> {
        Some("📣")
    }

    async fn execute(
        &self,
        ctx: &CallContext,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let message = arguments["message"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'message' argument".into()))?;
        info!(user = %ctx.user, message, "echo");
        Ok(serde_json::json!({ "status": "Message sent successfully", "message": message }))
    }
}
