//! Scripted providers and adapters for exercising the bridge in tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use toolbridge_core::adapter::{CallContext, ToolAdapter};
use toolbridge_core::error::{AdapterError, ProviderError};
use toolbridge_core::message::{Message, MessageToolCall};
use toolbridge_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use toolbridge_core::tool::{ToolDescriptor, ToolOutcome};

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue. With
/// `repeating`, the last response is returned forever; otherwise running
/// out of responses panics. Every request is recorded.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    repeat_last: bool,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::from_results(responses.into_iter().map(Ok).collect())
    }

    pub fn from_results(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            repeat_last: false,
        }
    }

    /// Return `response` on every call.
    pub fn repeating(response: ProviderResponse) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![response])
        }
    }

    /// A provider that returns a single text response (no tool calls).
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    /// A provider that first returns tool calls, then a final answer.
    pub fn tool_then_answer(tool_calls: Vec<MessageToolCall>, answer: &str) -> Self {
        Self::new(vec![
            make_tool_call_response(tool_calls, ""),
            make_text_response(answer),
        ])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let responses = self.responses.lock().unwrap();
        let count = requests.len();
        requests.push(request);

        let index = if self.repeat_last && count >= responses.len() {
            responses.len() - 1
        } else {
            count
        };
        match responses.get(index) {
            Some(response) => response.clone(),
            None => panic!(
                "SequentialMockProvider: no more responses (call #{count}, have {})",
                responses.len()
            ),
        }
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: usage(),
        model: "mock-model".into(),
    }
}

/// Create a response with tool calls and optional content.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>, content: &str) -> ProviderResponse {
    let mut msg = Message::assistant(content);
    msg.tool_calls = tool_calls;
    ProviderResponse {
        message: msg,
        usage: usage(),
        model: "mock-model".into(),
    }
}

/// Helper to create a tool call with structured arguments.
pub fn make_tool_call(id: &str, name: &str, args: Value) -> MessageToolCall {
    MessageToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: args,
    }
}

type Handler = Box<dyn Fn(&str, &Value) -> Result<ToolOutcome, AdapterError> + Send + Sync>;

/// An adapter whose tools are answered by a closure.
pub struct ScriptedAdapter {
    name: String,
    tools: Vec<ToolDescriptor>,
    handler: Handler,
    delay: Option<Duration>,
    connectable: AtomicBool,
    connected: AtomicBool,
    drop_after_call: AtomicBool,
    connects: AtomicUsize,
    calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedAdapter {
    /// `tools` are `(name, glyph)` pairs.
    pub fn new<F>(name: &str, tools: &[(&str, Option<&str>)], handler: F) -> Self
    where
        F: Fn(&str, &Value) -> Result<ToolOutcome, AdapterError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            tools: tools
                .iter()
                .map(|(tool, glyph)| ToolDescriptor {
                    name: tool.to_string(),
                    description: format!("{tool} tool"),
                    input_schema: serde_json::json!({"type": "object"}),
                    glyph: glyph.map(str::to_string),
                })
                .collect(),
            handler: Box::new(handler),
            delay: None,
            connectable: AtomicBool::new(true),
            connected: AtomicBool::new(false),
            drop_after_call: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Echo the tool name and arguments back as a success.
    pub fn echoing(name: &str, tools: &[(&str, Option<&str>)]) -> Self {
        Self::new(name, tools, |tool, args| {
            Ok(ToolOutcome::Success(
                serde_json::json!({"tool": tool, "args": args}),
            ))
        })
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make `connect` fail until re-enabled.
    pub fn set_connectable(&self, ok: bool) {
        self.connectable.store(ok, Ordering::SeqCst);
    }

    /// Report disconnected after the next call, as a backend that went away.
    pub fn drop_after_call(&self) {
        self.drop_after_call.store(true, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Tool names called so far, in order.
    pub fn called(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, force: bool) -> Result<(), AdapterError> {
        if self.is_connected() && !force {
            return Ok(());
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connectable.load(Ordering::SeqCst) {
            return Err(AdapterError::ConnectFailed(format!("{} is down", self.name)));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, AdapterError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        _ctx: &CallContext,
    ) -> Result<ToolOutcome, AdapterError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = (self.handler)(name, &arguments);
        if self.drop_after_call.swap(false, Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
