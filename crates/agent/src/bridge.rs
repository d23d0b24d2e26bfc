//! The bridge: a bounded, tool-augmented reasoning loop.
//!
//! Per exchange:
//!
//! 1. **Build** the transcript (system prompt, caller history, user turn)
//! 2. **Ask** the model, offering every tool from a connected adapter
//! 3. **If tool calls**: append the assistant turn, run the calls one by
//!    one in the order requested, append one result turn per call, and
//!    loop back to step 2
//! 4. **If text**: run the reply hooks and return
//!
//! After `max_iterations` model calls that still want tools, one last call
//! is made with no tools offered, so every exchange ends within
//! `max_iterations + 1` model calls.
//!
//! Tool problems (unknown tool, bad arguments, timeouts, failures) become
//! `{"error": ...}` result turns the model can react to. Provider failures
//! and broken adapter transports end the exchange with an error.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use toolbridge_config::BridgeConfig;
use toolbridge_core::adapter::{CallContext, ToolAdapter};
use toolbridge_core::error::{Error, ToolError};
use toolbridge_core::event::{DomainEvent, EventBus};
use toolbridge_core::message::{Message, MessageToolCall, Transcript};
use toolbridge_core::provider::{Provider, ProviderRequest, ToolDefinition};
use toolbridge_core::tool::{Tool, ToolOutcome, ToolRegistry};
use tracing::{debug, error, info, warn};

use crate::hooks::{ReplyVerifier, VerificationSession, review_all};

/// Called with a tool's glyph (or name) just before it runs.
pub type ToolNotifier = Arc<dyn Fn(&str) + Send + Sync>;

const DEFAULT_CORRECTION: &str =
    "Your previous answer was rejected. Answer again, following the instructions above.";

/// One user message to answer, with the context the shell keeps for it.
#[derive(Clone, Default)]
pub struct ExchangeRequest {
    pub message: String,

    /// Earlier turns of the conversation, oldest first.
    pub history: Vec<Message>,

    /// Invoking user, passed to tools and named in the system prompt.
    pub user: String,

    pub conversation_id: Option<String>,

    pub notifier: Option<ToolNotifier>,

    /// Restrict this exchange to the named tools. `None` offers all of them.
    pub limit_tools: Option<Vec<String>>,
}

impl ExchangeRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_notifier(mut self, notifier: ToolNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_tool_limit<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.limit_tools = Some(names.into_iter().map(Into::into).collect());
        self
    }

    fn allows(&self, tool: &str) -> bool {
        self.limit_tools
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == tool))
    }
}

/// Result of one exchange.
#[derive(Debug, Clone)]
pub struct BridgeReply {
    /// The final assistant turn, after reply hooks ran.
    pub message: Message,

    /// Every turn appended after the user turn, ending with `message`.
    pub turns: Vec<Message>,

    /// Model calls made by the loop, correction calls included. The forced
    /// tool-less call after the cap is not counted.
    pub iterations: usize,

    pub model_calls: usize,

    pub tool_calls_made: usize,

    /// Display labels of the tools that ran, first use first.
    pub tools_used: Vec<String>,

    /// A reply hook still objects to the final content.
    pub needs_retry: bool,

    pub warnings: Vec<String>,
}

impl BridgeReply {
    pub fn content(&self) -> &str {
        &self.message.content
    }
}

#[derive(Default)]
struct ExchangeStats {
    model_calls: usize,
    tool_calls: usize,
    tokens: u32,
    tools_used: Vec<String>,
}

/// The reasoning loop, its tool registry and the adapters that feed it.
pub struct Bridge {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    config: BridgeConfig,
    adapters: Vec<Arc<dyn ToolAdapter>>,
    verifiers: Vec<Arc<dyn ReplyVerifier>>,
    registry: RwLock<ToolRegistry>,
    initialized: tokio::sync::Mutex<bool>,
    event_bus: Arc<EventBus>,
}

impl Bridge {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, config: BridgeConfig) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: None,
            max_tokens: None,
            config,
            adapters: Vec::new(),
            verifiers: Vec::new(),
            registry: RwLock::new(ToolRegistry::new()),
            initialized: tokio::sync::Mutex::new(false),
            event_bus: Arc::new(EventBus::default()),
        }
    }

    /// Add a tool source. Adapters are connected in the order added, so a
    /// later adapter's tool replaces an earlier one with the same name.
    pub fn with_adapter(mut self, adapter: Arc<dyn ToolAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Add a reply hook.
    pub fn with_verifier(mut self, verifier: Arc<dyn ReplyVerifier>) -> Self {
        self.verifiers.push(verifier);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn adapters(&self) -> &[Arc<dyn ToolAdapter>] {
        &self.adapters
    }

    /// A copy of the registered tools.
    pub fn tools(&self) -> Vec<Tool> {
        self.registry
            .read()
            .map(|r| r.all().to_vec())
            .unwrap_or_default()
    }

    pub fn tool_count(&self) -> usize {
        self.registry.read().map(|r| r.len()).unwrap_or_default()
    }

    fn adapter(&self, name: &str) -> Option<&Arc<dyn ToolAdapter>> {
        self.adapters.iter().find(|a| a.name() == name)
    }

    fn lookup(&self, name: &str) -> Option<Tool> {
        self.registry.read().ok().and_then(|r| r.get(name).cloned())
    }

    fn register_all(&self, adapter: &str, tools: Vec<toolbridge_core::tool::ToolDescriptor>) {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for descriptor in tools {
            registry.register(Tool::from_descriptor(descriptor, adapter));
        }
    }

    /// Connect every adapter and register its tools.
    ///
    /// Runs once per bridge; later calls return immediately unless `force`
    /// is set, which clears the registry and reconnects everything. An
    /// adapter that fails to connect is logged and skipped. Returns the
    /// number of registered tools.
    pub async fn initialize(&self, force: bool) -> usize {
        let mut initialized = self.initialized.lock().await;
        if *initialized && !force {
            return self.tool_count();
        }

        if force
            && let Ok(mut registry) = self.registry.write()
        {
            registry.clear();
        }

        let mut connected = Vec::new();
        for adapter in &self.adapters {
            if let Err(e) = adapter.connect(force).await {
                warn!(adapter = adapter.name(), error = %e, "Adapter failed to connect, skipping");
                continue;
            }
            match adapter.list_tools().await {
                Ok(tools) => {
                    debug!(adapter = adapter.name(), count = tools.len(), "Registering tools");
                    self.register_all(adapter.name(), tools);
                    connected.push(adapter.name().to_string());
                }
                Err(e) => {
                    warn!(adapter = adapter.name(), error = %e, "Listing tools failed, skipping");
                }
            }
        }

        *initialized = true;
        let count = self.tool_count();
        info!(adapters = connected.len(), tools = count, "Bridge initialized");
        self.event_bus.publish(DomainEvent::BridgeInitialized {
            adapters: connected,
            tools_registered: count,
            timestamp: Utc::now(),
        });
        count
    }

    /// Give disconnected adapters another chance before an exchange.
    async fn reconnect_stale(&self) {
        for adapter in &self.adapters {
            if adapter.is_connected() {
                continue;
            }
            match adapter.connect(false).await {
                Ok(()) => match adapter.list_tools().await {
                    Ok(tools) => {
                        info!(adapter = adapter.name(), "Adapter reconnected");
                        self.register_all(adapter.name(), tools);
                        self.publish_adapter_state(adapter.name(), true);
                    }
                    Err(e) => debug!(adapter = adapter.name(), error = %e, "Listing tools failed"),
                },
                Err(e) => debug!(adapter = adapter.name(), error = %e, "Adapter still unavailable"),
            }
        }
    }

    /// Schemas of the tools `request` allows whose adapter is connected.
    fn available_schemas(&self, request: &ExchangeRequest) -> Vec<ToolDefinition> {
        let Ok(registry) = self.registry.read() else {
            return Vec::new();
        };
        registry
            .all()
            .iter()
            .filter(|tool| request.allows(&tool.name))
            .filter(|tool| self.adapter(&tool.adapter).is_some_and(|a| a.is_connected()))
            .map(Tool::to_definition)
            .collect()
    }

    fn publish_adapter_state(&self, adapter: &str, connected: bool) {
        self.event_bus.publish(DomainEvent::AdapterStateChanged {
            adapter: adapter.to_string(),
            connected,
            timestamp: Utc::now(),
        });
    }

    fn system_prompt(&self, user: &str) -> String {
        let mut prompt = self.config.system_prompt.clone();
        for addendum in self.verifiers.iter().filter_map(|v| v.system_prompt_addendum()) {
            prompt.push_str("\n\n");
            prompt.push_str(&addendum);
        }
        if !user.is_empty() {
            prompt.push_str(&format!("\n\nYou are talking with {user}."));
        }
        prompt
    }

    async fn call_model(
        &self,
        transcript: &Transcript,
        tools: Vec<ToolDefinition>,
        stats: &mut ExchangeStats,
    ) -> Result<Message, Error> {
        let request = ProviderRequest {
            model: self.model.clone(),
            messages: transcript.messages().to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools,
        };
        stats.model_calls += 1;
        let response = self.provider.complete(request).await.map_err(|e| {
            error!(provider = self.provider.name(), error = %e, "Model call failed");
            self.event_bus.publish(DomainEvent::ErrorOccurred {
                context: "model call".into(),
                error_message: e.to_string(),
                timestamp: Utc::now(),
            });
            Error::from(e)
        })?;
        if let Some(usage) = &response.usage {
            stats.tokens += usage.total_tokens;
        }
        Ok(response.message)
    }

    /// Answer one user message.
    pub async fn chat(&self, request: ExchangeRequest) -> Result<BridgeReply, Error> {
        self.initialize(false).await;
        self.reconnect_stale().await;

        let conversation = request.conversation_id.clone().unwrap_or_default();
        info!(conversation_id = %conversation, user = %request.user, "Processing exchange");

        let schemas = self.available_schemas(&request);
        let mut sessions: Vec<Box<dyn VerificationSession>> =
            self.verifiers.iter().map(|v| v.start()).collect();
        let mut transcript = Transcript::new(
            self.system_prompt(&request.user),
            &request.history,
            Message::user(&request.message),
        );
        let mut ctx = CallContext::new(&request.user);
        ctx.conversation_id = request.conversation_id.clone();

        let mut stats = ExchangeStats::default();
        let mut corrections_left = self.config.max_citation_retries;
        let max_iterations = self.config.max_iterations;
        let mut iteration = 0;

        let (mut message, verdict) = loop {
            if iteration >= max_iterations {
                warn!(
                    conversation_id = %conversation,
                    iterations = iteration,
                    "Max tool iterations reached, forcing text response"
                );
                let mut message = self.call_model(&transcript, Vec::new(), &mut stats).await?;
                message.tool_calls.clear();
                let verdict = review_all(&mut sessions, &message.content);
                break (message, verdict);
            }

            let tools = if iteration > 0 && !self.config.tools_after_first_exchange {
                Vec::new()
            } else {
                schemas.clone()
            };
            debug!(conversation_id = %conversation, iteration, tools = tools.len(), "Asking model");
            let message = self.call_model(&transcript, tools, &mut stats).await?;
            iteration += 1;

            if !message.has_tool_calls() {
                let verdict = review_all(&mut sessions, &message.content);
                if verdict.needs_retry && corrections_left > 0 && iteration < max_iterations {
                    corrections_left -= 1;
                    info!(warnings = ?verdict.warnings, "Reply rejected by hook, asking for a correction");
                    let correction = verdict
                        .correction
                        .clone()
                        .unwrap_or_else(|| DEFAULT_CORRECTION.to_string());
                    transcript.push(message);
                    transcript.push(Message::user(correction));
                    continue;
                }
                break (message, verdict);
            }

            let calls = message.tool_calls.clone();
            debug!(tool_count = calls.len(), "Executing tool calls");
            transcript.push(message);
            for call in &calls {
                let result = self
                    .execute_call(call, &ctx, &request, &mut sessions, &mut stats)
                    .await?;
                transcript.push(result);
            }
        };

        message.content = verdict.content;
        transcript.push(message.clone());

        self.event_bus.publish(DomainEvent::ResponseGenerated {
            conversation_id: conversation,
            model: self.model.clone(),
            iterations: iteration,
            tokens_used: stats.tokens,
            timestamp: Utc::now(),
        });

        Ok(BridgeReply {
            message,
            turns: transcript.appended().to_vec(),
            iterations: iteration,
            model_calls: stats.model_calls,
            tool_calls_made: stats.tool_calls,
            tools_used: stats.tools_used,
            needs_retry: verdict.needs_retry,
            warnings: verdict.warnings,
        })
    }

    /// Run one requested call and build its result turn.
    async fn execute_call(
        &self,
        call: &MessageToolCall,
        ctx: &CallContext,
        request: &ExchangeRequest,
        sessions: &mut [Box<dyn VerificationSession>],
        stats: &mut ExchangeStats,
    ) -> Result<Message, Error> {
        stats.tool_calls += 1;
        let start = Instant::now();

        let Some(tool) = self.lookup(&call.name) else {
            warn!(tool = %call.name, "Model requested an unknown tool");
            return Ok(result_turn(call, &ToolError::NotFound(call.name.clone()).into()));
        };
        if !request.allows(&tool.name) {
            warn!(tool = %tool.name, "Model requested a tool outside this exchange's limit");
            let outcome = ToolOutcome::failure(format!(
                "Tool {} is not available for this request",
                tool.name
            ));
            return Ok(result_turn(call, &outcome));
        }

        let label = tool.display_label().to_string();
        if let Some(notify) = &request.notifier {
            notify(&label);
        }
        if !stats.tools_used.contains(&label) {
            stats.tools_used.push(label);
        }

        let Some(adapter) = self.adapter(&tool.adapter) else {
            warn!(tool = %tool.name, adapter = %tool.adapter, "Owning adapter is missing");
            let outcome = ToolOutcome::failure(format!(
                "Tool {} is unavailable: adapter {} is not loaded",
                tool.name, tool.adapter
            ));
            return Ok(result_turn(call, &outcome));
        };

        let outcome = match normalize_arguments(&call.arguments) {
            Err(reason) => {
                warn!(tool = %tool.name, %reason, "Rejecting malformed tool arguments");
                ToolOutcome::from(ToolError::InvalidArguments(reason))
            }
            Ok(arguments) => {
                let was_connected = adapter.is_connected();
                let timeout_secs = self.config.timeout_for(&tool.name);
                let outcome = match tokio::time::timeout(
                    Duration::from_secs(timeout_secs),
                    adapter.call_tool(&tool.name, arguments.clone(), ctx),
                )
                .await
                {
                    Err(_) => {
                        warn!(tool = %tool.name, timeout_secs, "Tool call timed out");
                        ToolOutcome::from(ToolError::Timeout {
                            tool_name: tool.name.clone(),
                            timeout_secs,
                        })
                    }
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) if e.is_transport() => {
                        error!(tool = %tool.name, adapter = %tool.adapter, error = %e, "Tool transport failed");
                        self.publish_adapter_state(&tool.adapter, false);
                        self.event_bus.publish(DomainEvent::ErrorOccurred {
                            context: format!("tool {}", tool.name),
                            error_message: e.to_string(),
                            timestamp: Utc::now(),
                        });
                        return Err(Error::Transport {
                            adapter: tool.adapter.clone(),
                            source: e,
                        });
                    }
                    Ok(Err(e)) => {
                        warn!(tool = %tool.name, error = %e, "Tool call failed");
                        ToolOutcome::failure(e.to_string())
                    }
                };
                if was_connected && !adapter.is_connected() {
                    warn!(adapter = %tool.adapter, "Adapter lost its backend during a call");
                    self.publish_adapter_state(&tool.adapter, false);
                }
                for session in sessions.iter_mut() {
                    session.observe_tool_result(&tool, &arguments, &outcome);
                }
                outcome
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(tool = %tool.name, success = outcome.is_success(), duration_ms, "Tool finished");
        self.event_bus.publish(DomainEvent::ToolExecuted {
            tool_name: tool.name.clone(),
            adapter: tool.adapter.clone(),
            success: outcome.is_success(),
            duration_ms,
            timestamp: Utc::now(),
        });

        Ok(result_turn(call, &outcome))
    }

    /// Close every adapter.
    pub async fn close(&self) {
        for adapter in &self.adapters {
            adapter.close().await;
        }
    }
}

fn result_turn(call: &MessageToolCall, outcome: &ToolOutcome) -> Message {
    let mut turn = Message::tool_result(&call.id, outcome.to_transcript_content());
    turn.metadata
        .insert("tool_name".into(), Value::String(call.name.clone()));
    turn
}

/// Tool arguments must be a JSON object. A JSON-encoded object string is
/// accepted; anything else is rejected rather than guessed at.
fn normalize_arguments(raw: &Value) -> Result<Value, String> {
    match raw {
        Value::Object(_) => Ok(raw.clone()),
        Value::Null => Ok(Value::Object(Default::default())),
        Value::String(text) if text.trim().is_empty() => Ok(Value::Object(Default::default())),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(parsed @ Value::Object(_)) => Ok(parsed),
            Ok(_) => Err("arguments must be a JSON object".into()),
            Err(e) => Err(format!("arguments are not valid JSON: {e}")),
        },
        _ => Err("arguments must be a JSON object".into()),
    }
}
