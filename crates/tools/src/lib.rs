//! In-process tools for Toolbridge.
//!
//! Tools give the assistant the ability to act: do arithmetic, search the
//! web, and work with GitHub issues. They are exposed to the reasoning loop
//! through [`LocalToolsAdapter`], which resolves them from a static plugin
//! table instead of discovering modules at runtime.

pub mod calc;
pub mod echo;
pub mod github;
pub mod local;
pub mod web_search;

use std::sync::Arc;
use toolbridge_config::ToolsConfig;
use toolbridge_core::tool::LocalTool;

pub use local::LocalToolsAdapter;

/// The built-in plugin table, filtered by `config.enabled`.
pub fn builtin_plugins(config: &ToolsConfig) -> Vec<Arc<dyn LocalTool>> {
    let github = Arc::new(github::GitHubClient::new(
        config.github_token.clone(),
        config.github_org.clone(),
        config.github_repo.clone(),
    ));

    let table: Vec<Arc<dyn LocalTool>> = vec![
        Arc::new(calc::CalcTool),
        Arc::new(echo::EchoTool),
        Arc::new(web_search::WebSearchTool::new(config.anthropic_api_key.clone())),
        Arc::new(github::SearchIssuesTool::new(github.clone())),
        Arc::new(github::CreateIssueTool::new(github.clone())),
        Arc::new(github::CommentIssueTool::new(github)),
    ];

    table
        .into_iter()
        .filter(|tool| config.is_enabled(tool.name()))
        .collect()
}

/// A local adapter serving the built-in tools.
pub fn default_adapter(config: &ToolsConfig) -> LocalToolsAdapter {
    LocalToolsAdapter::new(builtin_plugins(config))
}
