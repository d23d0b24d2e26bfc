//! Configuration loading, validation, and management for Toolbridge.
//!
//! Loads configuration from `~/.toolbridge/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.toolbridge/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    /// Subprocess tool servers, keyed by adapter name.
    #[serde(default)]
    pub mcp: BTreeMap<String, McpServerConfig>,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_true() -> bool {
    true
}

// ── LLM backend ──────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" (native chat API) or "openai" (OpenAI-compatible)
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_llm_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// HTTP basic auth user for a proxied Ollama
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Bearer key for OpenAI-compatible backends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

fn default_backend() -> String {
    "ollama".into()
}
fn default_llm_url() -> String {
    "http://localhost:11434".into()
}
fn default_model() -> String {
    "hermes3".into()
}
fn default_llm_timeout() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            base_url: default_llm_url(),
            model: default_model(),
            username: None,
            password: None,
            api_key: None,
            temperature: None,
            max_tokens: None,
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("backend", &self.backend)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// ── Reasoning loop ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Tool-executing rounds allowed before the forced final answer
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// When false, only the first model call of an exchange sees tools
    #[serde(default = "default_true")]
    pub tools_after_first_exchange: bool,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Extra model calls allowed to correct flagged citations
    #[serde(default = "default_citation_retries")]
    pub max_citation_retries: usize,

    #[serde(default = "default_tool_timeout")]
    pub default_tool_timeout_secs: u64,

    /// Per-tool timeout overrides, in seconds
    #[serde(default = "default_tool_timeouts")]
    pub tool_timeouts: HashMap<String, u64>,
}

fn default_max_iterations() -> usize {
    10
}
fn default_system_prompt() -> String {
    "You are a helpful assistant. Use the available tools when they help answer \
     the question, and answer directly when they do not."
        .into()
}
fn default_citation_retries() -> usize {
    1
}
fn default_tool_timeout() -> u64 {
    25
}
fn default_tool_timeouts() -> HashMap<String, u64> {
    [
        ("query", 45),
        ("calc", 5),
        ("web_search", 30),
        ("search_github_issues", 30),
        ("create_github_issue", 30),
        ("comment_github_issue", 30),
    ]
    .into_iter()
    .map(|(name, secs)| (name.to_string(), secs))
    .collect()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tools_after_first_exchange: true,
            system_prompt: default_system_prompt(),
            max_citation_retries: default_citation_retries(),
            default_tool_timeout_secs: default_tool_timeout(),
            tool_timeouts: default_tool_timeouts(),
        }
    }
}

impl BridgeConfig {
    /// Timeout for one call of `tool`.
    pub fn timeout_for(&self, tool: &str) -> u64 {
        self.tool_timeouts
            .get(tool)
            .copied()
            .unwrap_or(self.default_tool_timeout_secs)
    }
}

// ── Local tools ──────────────────────────────────────────────────────────

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Built-in tools to expose. Empty means all of them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_org: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_repo: Option<String>,

    /// Key for the web search tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,
}

impl ToolsConfig {
    /// Whether the built-in tool `name` should be exposed.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.is_empty() || self.enabled.iter().any(|n| n == name)
    }
}

impl std::fmt::Debug for ToolsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsConfig")
            .field("enabled", &self.enabled)
            .field("github_token", &redact(&self.github_token))
            .field("github_org", &self.github_org)
            .field("github_repo", &self.github_repo)
            .field("anthropic_api_key", &redact(&self.anthropic_api_key))
            .finish()
    }
}

// ── Subprocess tool servers ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Stop the process after listing tools; respawn on first call
    #[serde(default = "default_true")]
    pub idle_after_listing: bool,

    /// Minimum spacing between failed start attempts
    #[serde(default = "default_connect_interval")]
    pub connect_retry_interval_secs: u64,
}

fn default_request_timeout() -> u64 {
    60
}

// ── Retrieval ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_retrieval_url")]
    pub server_url: String,

    /// Minimum spacing between connection attempts
    #[serde(default = "default_connect_interval")]
    pub connect_retry_interval_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Attempts for a timed-out query
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_backoff")]
    pub retry_backoff_ms: u64,

    /// Internal storage path segment rewritten to `public_prefix`
    #[serde(default = "default_storage_marker")]
    pub storage_marker: String,

    #[serde(default = "default_public_prefix")]
    pub public_prefix: String,
}

fn default_retrieval_url() -> String {
    "http://localhost:8001".into()
}
fn default_connect_interval() -> u64 {
    10
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_query_timeout() -> u64 {
    45
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff() -> u64 {
    1000
}
fn default_storage_marker() -> String {
    "md_db/".into()
}
fn default_public_prefix() -> String {
    "handbook.hypha.coop/".into()
}

impl RetrievalConfig {
    /// Longest one `query` call can take: every attempt timing out, with
    /// the backoff between attempts. Rounded up to whole seconds.
    pub fn call_budget_secs(&self) -> u64 {
        let attempts = u64::from(self.max_retries.max(1));
        let millis = self.query_timeout_secs * 1000 * attempts
            + self.retry_backoff_ms * (attempts - 1);
        millis.div_ceil(1000)
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_url: default_retrieval_url(),
            connect_retry_interval_secs: default_connect_interval(),
            connect_timeout_secs: default_connect_timeout(),
            query_timeout_secs: default_query_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_backoff(),
            storage_marker: default_storage_marker(),
            public_prefix: default_public_prefix(),
        }
    }
}

// ── HTTP gateway ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from the default path (~/.toolbridge/config.toml)
    /// and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    ///
    /// Recognised keys: `TOOLBRIDGE_LLM_URL`, `TOOLBRIDGE_LLM_MODEL`,
    /// `TOOLBRIDGE_LLM_USERNAME`, `TOOLBRIDGE_LLM_PASSWORD`,
    /// `TOOLBRIDGE_LLM_API_KEY`, `TOOLBRIDGE_RETRIEVAL_URL`, `GITHUB_TOKEN`,
    /// `ANTHROPIC_API_KEY`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("TOOLBRIDGE_LLM_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("TOOLBRIDGE_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(user) = lookup("TOOLBRIDGE_LLM_USERNAME") {
            self.llm.username = Some(user);
        }
        if let Some(password) = lookup("TOOLBRIDGE_LLM_PASSWORD") {
            self.llm.password = Some(password);
        }
        if let Some(key) = lookup("TOOLBRIDGE_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = lookup("TOOLBRIDGE_RETRIEVAL_URL") {
            self.retrieval.server_url = url;
            self.retrieval.enabled = true;
        }
        // Explicit config wins over the generic provider variables.
        if self.tools.github_token.is_none() {
            self.tools.github_token = lookup("GITHUB_TOKEN");
        }
        if self.tools.anthropic_api_key.is_none() {
            self.tools.anthropic_api_key = lookup("ANTHROPIC_API_KEY");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".toolbridge")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "bridge.max_iterations must be at least 1".into(),
            ));
        }

        if !matches!(self.llm.backend.as_str(), "ollama" | "openai") {
            return Err(ConfigError::ValidationError(format!(
                "llm.backend must be \"ollama\" or \"openai\", got \"{}\"",
                self.llm.backend
            )));
        }

        if let Some(t) = self.llm.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(ConfigError::ValidationError(
                "llm.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        for (name, server) in &self.mcp {
            if server.command.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "mcp.{name}.command must not be empty"
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
