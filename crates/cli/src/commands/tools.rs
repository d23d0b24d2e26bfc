//! `toolbridge tools`: list the tools every adapter provides.

use std::path::Path;

use toolbridge_cli::{build_bridge, load_config};
use toolbridge_core::ToolAdapter;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let bridge = build_bridge(&config)?;
    bridge.initialize(false).await;

    for adapter in bridge.adapters() {
        let state = if adapter.is_connected() { "connected" } else { "unavailable" };
        println!("{} ({state})", adapter.name());
    }
    println!();

    let mut tools = bridge.tools();
    tools.sort_by(|a, b| a.name.cmp(&b.name));
    for tool in &tools {
        println!(
            "  {} {:<24} [{}] {}",
            tool.glyph.as_deref().unwrap_or(" "),
            tool.name,
            tool.adapter,
            tool.description
        );
    }
    println!("\n{} tools", tools.len());

    bridge.close().await;
    Ok(())
}
