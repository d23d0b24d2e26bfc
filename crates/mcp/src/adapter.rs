//! [`ToolAdapter`] over a spawned tool server.

use std::sync::{Mutex as StdMutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::Instant;
use toolbridge_config::McpServerConfig;
use toolbridge_core::adapter::{CallContext, ToolAdapter};
use toolbridge_core::error::AdapterError;
use toolbridge_core::tool::{ToolDescriptor, ToolOutcome};
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::process::{LaunchSpec, ServerProcess};
use crate::protocol::{CallToolParams, ListToolsResult, METHOD_CALL_TOOL, METHOD_LIST_TOOLS};

/// Adapter that runs tools in a child process speaking line-delimited JSON-RPC.
///
/// `connect` spawns the server, lists its tools and (with
/// `idle_after_listing`) stops it again. Calls spawn it lazily. If the
/// process died, or it was started on a runtime other than the caller's,
/// the next call kills it and starts a fresh process on the caller's
/// runtime. After a failed connect, further attempts wait out
/// `connect_retry_interval` unless forced.
pub struct McpAdapter {
    name: String,
    launch: LaunchSpec,
    request_timeout: Duration,
    idle_after_listing: bool,
    connect_retry_interval: Duration,
    last_attempt: StdMutex<Option<Instant>>,
    process: Mutex<Option<ServerProcess>>,
    tools: RwLock<Vec<ToolDescriptor>>,
    connected: AtomicBool,
    generation: AtomicU64,
}

impl McpAdapter {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            launch: LaunchSpec {
                command: command.into(),
                args,
                env: Vec::new(),
            },
            request_timeout: Duration::from_secs(60),
            idle_after_listing: true,
            connect_retry_interval: Duration::from_secs(10),
            last_attempt: StdMutex::new(None),
            process: Mutex::new(None),
            tools: RwLock::new(Vec::new()),
            connected: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &McpServerConfig) -> Self {
        let mut adapter = Self::new(name, &config.command, config.args.clone())
            .with_request_timeout(Duration::from_secs(config.request_timeout_secs))
            .with_idle_after_listing(config.idle_after_listing)
            .with_connect_retry_interval(Duration::from_secs(config.connect_retry_interval_secs));
        adapter.launch.env = config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        adapter
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_idle_after_listing(mut self, idle: bool) -> Self {
        self.idle_after_listing = idle;
        self
    }

    /// Minimum wait after a failed connect before the next non-forced one.
    pub fn with_connect_retry_interval(mut self, interval: Duration) -> Self {
        self.connect_retry_interval = interval;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.launch.env.push((key.into(), value.into()));
        self
    }

    /// PID of the running server, `None` while idle.
    pub async fn process_id(&self) -> Option<u32> {
        let guard = self.process.lock().await;
        guard.as_ref().filter(|p| p.is_alive()).and_then(|p| p.pid())
    }

    /// Number of processes spawned so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn spawn(&self) -> Result<ServerProcess, McpError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        ServerProcess::spawn(&self.launch, generation)
    }

    /// Send a request, starting the server first if needed.
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let mut guard = self.process.lock().await;

        if let Some(process) = guard.take_if(|p| !p.is_alive() || !p.is_local()) {
            debug!(
                adapter = %self.name,
                generation = process.generation(),
                alive = process.is_alive(),
                "Tool server not usable from this runtime, respawning"
            );
            process.kill();
        }
        if guard.is_none() {
            *guard = Some(self.spawn()?);
        }

        let Some(process) = guard.as_ref() else {
            return Err(McpError::ConnectionClosed);
        };
        let result = process.request(method, params, self.request_timeout).await;

        if matches!(&result, Err(e) if e.is_transport())
            && let Some(dead) = guard.take()
        {
            dead.shutdown().await;
        }
        result
    }

    async fn stop_process(&self) {
        let Some(process) = self.process.lock().await.take() else {
            return;
        };
        if process.is_local() {
            process.shutdown().await;
        } else {
            process.kill();
        }
    }
}

/// Turn a `tools/call` result into an outcome. Servers may flag failures
/// in-band with `isError`.
fn outcome_from_result(value: Value) -> ToolOutcome {
    if value.get("isError").and_then(Value::as_bool) == Some(true) {
        let text = value["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "tool reported an error".into());
        return ToolOutcome::Failure(text);
    }
    ToolOutcome::Success(value)
}

#[async_trait]
impl ToolAdapter for McpAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, force: bool) -> Result<(), AdapterError> {
        if self.is_connected() && !force {
            return Ok(());
        }

        {
            let mut last = self
                .last_attempt
                .lock()
                .map_err(|_| AdapterError::ConnectFailed("connect state poisoned".into()))?;
            let wait = last.map_or(Duration::ZERO, |at| {
                self.connect_retry_interval.saturating_sub(at.elapsed())
            });
            if !force && !wait.is_zero() {
                debug!(adapter = %self.name, wait_ms = wait.as_millis() as u64, "Connect attempt throttled");
                return Err(AdapterError::ConnectFailed(format!(
                    "tool server {} unavailable, next attempt in {}s",
                    self.name,
                    wait.as_secs().max(1)
                )));
            }
            *last = Some(Instant::now());
        }

        if force {
            self.stop_process().await;
        }

        let listed = match self.request(METHOD_LIST_TOOLS, json!({})).await {
            Ok(value) => value,
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                self.stop_process().await;
                warn!(adapter = %self.name, error = %e, "Tool server failed to start");
                return Err(AdapterError::ConnectFailed(e.to_string()));
            }
        };

        let listing: ListToolsResult = serde_json::from_value(listed).map_err(|e| {
            AdapterError::ConnectFailed(format!("invalid tools/list result: {e}"))
        })?;

        info!(
            adapter = %self.name,
            tools = listing.tools.len(),
            "Tool server connected"
        );
        if let Ok(mut tools) = self.tools.write() {
            *tools = listing.tools;
        }
        self.connected.store(true, Ordering::SeqCst);
        if let Ok(mut last) = self.last_attempt.lock() {
            *last = None;
        }

        if self.idle_after_listing {
            self.stop_process().await;
        }
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::NotConnected(self.name.clone()));
        }
        Ok(self.tools.read().map(|t| t.clone()).unwrap_or_default())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        ctx: &CallContext,
    ) -> Result<ToolOutcome, AdapterError> {
        if !self.is_connected() {
            return Err(AdapterError::NotConnected(self.name.clone()));
        }
        debug!(adapter = %self.name, tool = name, user = %ctx.user, "Calling tool server");

        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })
        .map_err(|e| AdapterError::Remote(e.to_string()))?;

        match self.request(METHOD_CALL_TOOL, params).await {
            Ok(value) => Ok(outcome_from_result(value)),
            Err(McpError::ServerError { message, .. }) => Ok(ToolOutcome::Failure(message)),
            Err(e @ McpError::SpawnFailed(_)) => {
                warn!(adapter = %self.name, error = %e, "Could not restart tool server");
                Err(AdapterError::NotConnected(format!("{}: {e}", self.name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&self) {
        self.stop_process().await;
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
