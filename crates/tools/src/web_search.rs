//! `web_search`: answers questions from the live web.
//!
//! Delegates to the Anthropic Messages API with its server-side web search
//! tool enabled and returns the text of the answer.

use async_trait::async_trait;
use std::time::Duration;
use toolbridge_core::adapter::CallContext;
use toolbridge_core::error::ToolError;
use toolbridge_core::tool::LocalTool;
use tracing::debug;

const DEFAULT_API_BASE: &str = "https://api.anthropic.com/v1";
const SEARCH_MODEL: &str = "claude-3-5-haiku-latest";

pub struct WebSearchTool {
    api_key: Option<String>,
    api_base: String,
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key,
            api_base: DEFAULT_API_BASE.into(),
            client,
        }
    }

    /// Point at a different API host.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl LocalTool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the internet for current information. Use this for recent events, \
         news, or anything that may not be in your training data."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query or question"
                },
                "max_tokens": {
                    "type": "integer",
                    "description": "Maximum length of the answer (100-4000, default 1024)",
                    "default": 1024
                }
            },
            "required": ["query"]
        })
    }

    fn glyph(&self) -> Option<&str> {
        Some("🌐")
    }

    async fn execute(
        &self,
        _ctx: &CallContext,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let query = arguments["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("No search query provided".into()))?;
        let max_tokens = arguments["max_tokens"].as_u64().unwrap_or(1024).clamp(100, 4000);

        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::NotConfigured("Web search API key is not configured".into()))?;

        let body = serde_json::json!({
            "model": SEARCH_MODEL,
            "max_tokens": max_tokens,
            "messages": [{
                "role": "user",
                "content": format!(
                    "Search the internet for current information about: {query}\n\n\
                     Give a concise, accurate answer with key facts and sources."
                ),
            }],
            "tools": [{ "type": "web_search_20250305", "name": "web_search", "max_uses": 3 }],
        });

        debug!(query, "Running web search");

        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: "web_search".into(),
            reason,
        };

        let response = self
            .client
            .post(format!("{}/messages", self.api_base))
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(failed(format!("search API returned {status}: {text}")));
        }

        let payload: serde_json::Value = response.json().await.map_err(|e| failed(e.to_string()))?;
        let answer = payload["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"] == "text")
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if answer.trim().is_empty() {
            return Err(failed("search returned no answer".into()));
        }

        Ok(serde_json::json!({ "query": query, "answer": answer }))
    }
}
