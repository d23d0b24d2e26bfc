//! Wiring shared by the `toolbridge` commands: configuration loading and
//! assembling a [`Bridge`] from it.

use std::path::Path;
use std::sync::Arc;

use toolbridge_agent::Bridge;
use toolbridge_config::{AppConfig, BridgeConfig, ConfigError};
use toolbridge_core::Provider;
use toolbridge_core::error::ProviderError;
use toolbridge_mcp::McpAdapter;
use toolbridge_retrieval::{CitationVerifier, PathNormalizer, QUERY_TOOL, RetrievalAdapter};
use tracing::debug;

/// Load configuration from `path`, or from `~/.toolbridge/config.toml`
/// when none is given. Environment overrides apply in both cases.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        None => AppConfig::load(),
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config.validate()?;
            Ok(config)
        }
    }
}

/// Build the bridge described by `config`, using the configured LLM backend.
pub fn build_bridge(config: &AppConfig) -> Result<Bridge, ProviderError> {
    let provider = toolbridge_providers::build_from_config(&config.llm)?;
    Ok(build_bridge_with(config, provider))
}

/// Build the bridge described by `config` around an existing provider.
///
/// Adapters are registered in this order, so on a name clash the later
/// one wins: local tools, subprocess servers (by name), document index.
pub fn build_bridge_with(config: &AppConfig, provider: Arc<dyn Provider>) -> Bridge {
    let mut bridge = Bridge::new(provider, &config.llm.model, bridge_config(config))
        .with_temperature(config.llm.temperature)
        .with_max_tokens(config.llm.max_tokens)
        .with_adapter(Arc::new(toolbridge_tools::default_adapter(&config.tools)));

    for (name, server) in &config.mcp {
        debug!(adapter = %name, command = %server.command, "Adding tool server");
        bridge = bridge.with_adapter(Arc::new(McpAdapter::from_config(name, server)));
    }

    if config.retrieval.enabled {
        let retrieval = &config.retrieval;
        bridge = bridge
            .with_adapter(Arc::new(RetrievalAdapter::from_config(retrieval)))
            .with_verifier(Arc::new(CitationVerifier::new(PathNormalizer::new(
                &retrieval.storage_marker,
                &retrieval.public_prefix,
            ))));
    }
    bridge
}

/// The loop settings, with the `query` timeout widened so a call can run
/// every retry attempt the document index is configured for.
pub fn bridge_config(config: &AppConfig) -> BridgeConfig {
    let mut bridge = config.bridge.clone();
    if config.retrieval.enabled {
        let budget = config.retrieval.call_budget_secs();
        let configured = bridge.timeout_for(QUERY_TOOL);
        if configured < budget {
            debug!(configured, budget, "Raising query tool timeout to cover retries");
            bridge.tool_timeouts.insert(QUERY_TOOL.to_string(), budget);
        }
    }
    bridge
}
