//! `toolbridge serve-tools`: expose the local tools to other processes.

use std::path::Path;

use tokio::io::BufReader;
use toolbridge_cli::load_config;
use toolbridge_core::ToolAdapter;
use tracing::info;

pub async fn run(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let adapter = toolbridge_tools::default_adapter(&config.tools);
    adapter.connect(false).await?;

    info!(tools = adapter.list_tools().await?.len(), "Serving local tools on stdio");
    toolbridge_mcp::serve(&adapter, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;
    Ok(())
}
