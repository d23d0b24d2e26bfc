//! Ollama native chat provider.
//!
//! Talks to `POST <base>/api/chat` with `stream: false`. Ollama returns tool
//! calls with structured (object) arguments and often without ids, so ids
//! are synthesized here to keep tool-result turns matchable.
//!
//! Deployments behind a reverse proxy commonly require HTTP basic auth,
//! which is sent when a username is configured.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use toolbridge_core::error::ProviderError;
use toolbridge_core::message::{Message, MessageToolCall, Role};
use toolbridge_core::provider::*;
use tracing::{debug, warn};

use crate::{decode_arguments, error_for_request, error_for_status};

/// A provider backed by Ollama's native chat endpoint.
pub struct OllamaProvider {
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider for the Ollama server at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, std::time::Duration::from_secs(120))
    }

    /// Create a provider with a custom request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: None,
            password: None,
            client,
        }
    }

    /// Send HTTP basic auth with every request.
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }

    /// Convert our Message types to Ollama chat format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: m.content.clone(),
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|tc| ApiToolCall {
                        id: Some(tc.id.clone()),
                        function: ApiFunction {
                            name: tc.name.clone(),
                            arguments: tc.arguments.clone(),
                        },
                    })
                    .collect(),
                tool_call_id: m.tool_call_id.clone(),
                tool_name: m
                    .metadata
                    .get("tool_name")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            })
            .collect()
    }

    /// Turn the response message into our assistant turn.
    fn from_api_message(message: ApiMessage) -> Message {
        let tool_calls = message
            .tool_calls
            .into_iter()
            .enumerate()
            .map(|(i, tc)| {
                let arguments = match tc.function.arguments {
                    serde_json::Value::String(raw) => decode_arguments(&raw),
                    serde_json::Value::Null => serde_json::json!({}),
                    other => other,
                };
                MessageToolCall {
                    id: tc
                        .id
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| format!("call_{i}_{}", uuid::Uuid::new_v4().simple())),
                    name: tc.function.name,
                    arguments,
                }
            })
            .collect();

        let mut out = Message::assistant(message.content);
        out.tool_calls = tool_calls;
        out
    }
}

#[async_trait]
impl toolbridge_core::Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": false,
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::Value::Array(
                request.tools.iter().map(ToolDefinition::to_function_schema).collect(),
            );
        }

        let mut options = serde_json::Map::new();
        if let Some(t) = request.temperature {
            options.insert("temperature".into(), serde_json::json!(t));
        }
        if let Some(n) = request.max_tokens {
            options.insert("num_predict".into(), serde_json::json!(n));
        }
        if !options.is_empty() {
            body["options"] = serde_json::Value::Object(options);
        }

        debug!(
            provider = "ollama",
            model = %request.model,
            tools = request.tools.len(),
            "Sending chat request"
        );

        let response = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(error_for_request)?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Ollama returned error");
            return Err(error_for_status(status, error_body, &request.model));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        let usage = match (api_response.prompt_eval_count, api_response.eval_count) {
            (None, None) => None,
            (prompt, completion) => {
                let prompt = prompt.unwrap_or(0);
                let completion = completion.unwrap_or(0);
                Some(Usage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: prompt + completion,
                })
            }
        };

        Ok(ProviderResponse {
            message: Self::from_api_message(api_response.message),
            usage,
            model: api_response.model.unwrap_or(request.model),
        })
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(error_for_request)?;
        Ok(response.status().is_success())
    }
}

// --- Ollama API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    message: ApiMessage,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}
