//! `toolbridge gateway`: start the HTTP session server.

use std::path::Path;
use std::sync::Arc;

use toolbridge_cli::{build_bridge, load_config};

pub async fn run(
    config_path: Option<&Path>,
    port_override: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let bridge = build_bridge(&config)?;
    let tools = bridge.initialize(false).await;

    println!("Toolbridge Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.llm.model);
    println!("   Tools:     {tools}");

    toolbridge_gateway::start(&config.gateway, Arc::new(bridge)).await?;
    Ok(())
}
