//! The in-process tool adapter.
//!
//! Wraps a fixed table of [`LocalTool`] plugins. Every call is isolated:
//! an error *or a panic* inside a plugin becomes a [`ToolOutcome::Failure`]
//! so one misbehaving tool cannot take down the exchange.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use toolbridge_core::adapter::{CallContext, ToolAdapter};
use toolbridge_core::error::AdapterError;
use toolbridge_core::tool::{LocalTool, ToolDescriptor, ToolOutcome};
use tracing::{debug, info, warn};

/// Adapter serving in-process plugins.
pub struct LocalToolsAdapter {
    name: String,
    plugins: Vec<Arc<dyn LocalTool>>,
    connected: AtomicBool,
}

impl LocalToolsAdapter {
    /// Create an adapter named `local` over the given plugins.
    pub fn new(plugins: Vec<Arc<dyn LocalTool>>) -> Self {
        Self::named("local", plugins)
    }

    pub fn named(name: impl Into<String>, plugins: Vec<Arc<dyn LocalTool>>) -> Self {
        Self {
            name: name.into(),
            plugins,
            connected: AtomicBool::new(false),
        }
    }

    fn plugin(&self, name: &str) -> Option<&Arc<dyn LocalTool>> {
        self.plugins.iter().find(|p| p.name() == name)
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[async_trait]
impl ToolAdapter for LocalToolsAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, _force: bool) -> Result<(), AdapterError> {
        self.connected.store(true, Ordering::SeqCst);
        info!(adapter = %self.name, plugins = self.plugins.len(), "Local tools loaded");
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, AdapterError> {
        Ok(self.plugins.iter().map(|p| p.to_descriptor()).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        ctx: &CallContext,
    ) -> Result<ToolOutcome, AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::NotConnected(self.name.clone()));
        }
        let plugin = self
            .plugin(name)
            .ok_or_else(|| AdapterError::UnknownTool(name.to_string()))?;

        debug!(tool = name, user = %ctx.user, "Executing local tool");

        let outcome = match AssertUnwindSafe(plugin.execute(ctx, arguments))
            .catch_unwind()
            .await
        {
            Ok(Ok(value)) => ToolOutcome::Success(value),
            Ok(Err(e)) => {
                warn!(tool = name, error = %e, "Local tool failed");
                ToolOutcome::Failure(e.to_string())
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(tool = name, panic = %message, "Local tool panicked");
                ToolOutcome::Failure(format!("Tool {name} crashed: {message}"))
            }
        };
        Ok(outcome)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolbridge_core::error::ToolError;

    struct PanickingTool;

    #[async_trait]
    impl LocalTool for PanickingTool {
        fn name(&self) -> &str {
            "explode"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _ctx: &CallContext,
            _arguments: serde_json::Value,
        ) -> Result<serde_json::Value, ToolError> {
            panic!("kaboom");
        }
    }

    fn adapter() -> LocalToolsAdapter {
        LocalToolsAdapter::new(vec![
            Arc::new(crate::calc::CalcTool),
            Arc::new(PanickingTool),
        ])
    }

    #[tokio::test]
    async fn lists_plugins_as_descriptors() {
        let adapter = adapter();
        adapter.connect(false).await.unwrap();
        let names: Vec<_> = adapter
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["calc", "explode"]);
    }

    #[tokio::test]
    async fn call_before_connect_is_rejected() {
        let err = adapter()
            .call_tool("calc", serde_json::json!({"expression": "1"}), &CallContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::NotConnected(_)));
    }

    #[tokio::test]
    async fn successful_call() {
        let adapter = adapter();
        adapter.connect(false).await.unwrap();
        let outcome = adapter
            .call_tool("calc", serde_json::json!({"expression": "6*7"}), &CallContext::default())
            .await
            .unwrap();
        match outcome {
            ToolOutcome::Success(v) => assert_eq!(v["result"], "42"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_error_becomes_failure_outcome() {
        let adapter = adapter();
        adapter.connect(false).await.unwrap();
        let outcome = adapter
            .call_tool("calc", serde_json::json!({}), &CallContext::default())
            .await
            .unwrap();
        assert!(!outcome.is_success());
        assert!(outcome.to_transcript_content().contains("expression"));
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let adapter = adapter();
        adapter.connect(false).await.unwrap();
        let outcome = adapter
            .call_tool("explode", serde_json::json!({}), &CallContext::default())
            .await
            .unwrap();
        match outcome {
            ToolOutcome::Failure(msg) => assert!(msg.contains("kaboom")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_adapter_error() {
        let adapter = adapter();
        adapter.connect(false).await.unwrap();
        let err = adapter
            .call_tool("nope", serde_json::json!({}), &CallContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn close_disconnects() {
        let adapter = adapter();
        adapter.connect(false).await.unwrap();
        assert!(adapter.is_connected());
        adapter.close().await;
        assert!(!adapter.is_connected());
    }
}
