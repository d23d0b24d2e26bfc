//! GitHub issue tools: search, create, and comment.
//!
//! All three share one [`GitHubClient`] holding the token and the default
//! organization/repository, so the model can omit them for the common case.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use toolbridge_core::adapter::CallContext;
use toolbridge_core::error::ToolError;
use toolbridge_core::tool::LocalTool;
use tracing::debug;

const GITHUB_API_BASE: &str = "https://api.github.com";

/// Shared REST client for the GitHub tools.
pub struct GitHubClient {
    token: Option<String>,
    api_base: String,
    default_org: String,
    default_repo: String,
    client: reqwest::Client,
}

impl GitHubClient {
    pub fn new(token: Option<String>, org: Option<String>, repo: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("toolbridge")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            token,
            api_base: GITHUB_API_BASE.into(),
            default_org: org.unwrap_or_else(|| "hyphacoop".into()),
            default_repo: repo.unwrap_or_else(|| "organizing-private".into()),
            client,
        }
    }

    /// Point at a different API host (GitHub Enterprise, tests).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn repo_path(&self, arguments: &serde_json::Value) -> String {
        let org = arguments["org"].as_str().unwrap_or(self.default_org.as_str());
        let repo = arguments["repo"].as_str().unwrap_or(self.default_repo.as_str());
        format!("{}/repos/{org}/{repo}", self.api_base)
    }

    async fn send(
        &self,
        tool: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, ToolError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ToolError::NotConfigured("GitHub token is missing".into()))?;

        let failed = |reason: String| ToolError::ExecutionFailed {
            tool_name: tool.to_string(),
            reason,
        };

        let response = request
            .header("Authorization", format!("token {token}"))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(failed(format!("GitHub returned {}: {text}", status.as_u16())));
        }
        response.json().await.map_err(|e| failed(e.to_string()))
    }
}

/// Strip the leading `@` people write in front of usernames.
fn normalize_login(login: &str) -> &str {
    login.trim().trim_start_matches('@')
}

fn string_list(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => s
            .split(',')
            .map(|p| normalize_login(p).to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|p| normalize_login(p).to_string())
            .collect(),
        _ => Vec::new(),
    }
}

#[derive(Debug, Deserialize)]
struct ApiIssue {
    number: u64,
    title: String,
    html_url: String,
    state: String,
    #[serde(default)]
    assignees: Vec<ApiUser>,
    #[serde(default)]
    labels: Vec<ApiLabel>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiLabel {
    name: String,
}

// ── search_github_issues ─────────────────────────────────────────────────

pub struct SearchIssuesTool {
    github: Arc<GitHubClient>,
}

impl SearchIssuesTool {
    pub fn new(github: Arc<GitHubClient>) -> Self {
        Self { github }
    }
}

#[async_trait]
impl LocalTool for SearchIssuesTool {
    fn name(&self) -> &str {
        "search_github_issues"
    }

    fn description(&self) -> &str {
        "Search GitHub issues by organization, repository, and optional filters like \
         label, state, or assignee. Defaults to the configured repository and open issues."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "org": { "type": "string", "description": "GitHub organization" },
                "repo": { "type": "string", "description": "Repository name" },
                "label": { "type": "string", "description": "Label to filter by" },
                "state": {
                    "type": "string",
                    "enum": ["open", "closed", "all"],
                    "default": "open"
                },
                "assignee": {
                    "type": "string",
                    "description": "Assignee login; \"none\" for unassigned issues"
                }
            }
        })
    }

    fn glyph(&self) -> Option<&str> {
        Some("📂")
    }

    async fn execute(
        &self,
        _ctx: &CallContext,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let url = format!("{}/issues", self.github.repo_path(&arguments));
        let mut query: Vec<(&str, String)> = vec![(
            "state",
            arguments["state"].as_str().unwrap_or("open").to_string(),
        )];
        if let Some(label) = arguments["label"].as_str() {
            query.push(("labels", label.to_string()));
        }
        if let Some(assignee) = arguments["assignee"].as_str() {
            query.push(("assignee", normalize_login(assignee).to_string()));
        }

        debug!(%url, "Searching GitHub issues");
        let raw = self
            .github
            .send(self.name(), self.github.client.get(&url).query(&query))
            .await?;

        let issues: Vec<ApiIssue> = serde_json::from_value(raw).map_err(|e| {
            ToolError::ExecutionFailed {
                tool_name: self.name().into(),
                reason: format!("unexpected response: {e}"),
            }
        })?;

        let found: Vec<serde_json::Value> = issues
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .map(|i| {
                serde_json::json!({
                    "number": i.number,
                    "title": i.title,
                    "url": i.html_url,
                    "state": i.state,
                    "assignees": i.assignees.into_iter().map(|u| u.login).collect::<Vec<_>>(),
                    "labels": i.labels.into_iter().map(|l| l.name).collect::<Vec<_>>(),
                })
            })
            .collect();

        Ok(serde_json::json!({ "count": found.len(), "issues": found }))
    }
}

// ── create_github_issue ──────────────────────────────────────────────────

pub struct CreateIssueTool {
    github: Arc<GitHubClient>,
}

impl CreateIssueTool {
    pub fn new(github: Arc<GitHubClient>) -> Self {
        Self { github }
    }
}

#[async_trait]
impl LocalTool for CreateIssueTool {
    fn name(&self) -> &str {
        "create_github_issue"
    }

    fn description(&self) -> &str {
        "Create a new GitHub issue with a title, optional body, labels, and assignees."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "org": { "type": "string" },
                "repo": { "type": "string" },
                "title": { "type": "string", "description": "Issue title" },
                "body": { "type": "string", "description": "Issue description" },
                "labels": { "type": "array", "items": { "type": "string" } },
                "assignees": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["title"]
        })
    }

    fn glyph(&self) -> Option<&str> {
        Some("📝")
    }

    async fn execute(
        &self,
        ctx: &CallContext,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let title = arguments["title"]
            .as_str()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'title' argument".into()))?;

        let mut payload = serde_json::json!({
            "title": title,
            "body": arguments["body"].as_str().unwrap_or_default(),
        });
        let labels = string_list(&arguments["labels"]);
        if !labels.is_empty() {
            payload["labels"] = serde_json::json!(labels);
        }
        let assignees = string_list(&arguments["assignees"]);
        if !assignees.is_empty() {
            payload["assignees"] = serde_json::json!(assignees);
        }

        let url = format!("{}/issues", self.github.repo_path(&arguments));
        debug!(%url, user = %ctx.user, "Creating GitHub issue");
        let created = self
            .github
            .send(self.name(), self.github.client.post(&url).json(&payload))
            .await?;

        Ok(serde_json::json!({
            "number": created["number"],
            "url": created["html_url"],
            "title": created["title"],
        }))
    }
}

// ── comment_github_issue ─────────────────────────────────────────────────

pub struct CommentIssueTool {
    github: Arc<GitHubClient>,
}

impl CommentIssueTool {
    pub fn new(github: Arc<GitHubClient>) -> Self {
        Self { github }
    }
}

#[async_trait]
impl LocalTool for CommentIssueTool {
    fn name(&self) -> &str {
        "comment_github_issue"
    }

    fn description(&self) -> &str {
        "Add a comment to an existing GitHub issue by number."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "org": { "type": "string" },
                "repo": { "type": "string" },
                "number": { "type": "integer", "description": "Issue number" },
                "comment": { "type": "string", "description": "Comment text" }
            },
            "required": ["number", "comment"]
        })
    }

    fn glyph(&self) -> Option<&str> {
        Some("💬")
    }

    async fn execute(
        &self,
        _ctx: &CallContext,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, ToolError> {
        let number = arguments["number"]
            .as_u64()
            .ok_or_else(|| ToolError::InvalidArguments("Missing integer 'number' argument".into()))?;
        let comment = arguments["comment"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'comment' argument".into()))?;

        let url = format!("{}/issues/{number}/comments", self.github.repo_path(&arguments));
        let created = self
            .github
            .send(
                self.name(),
                self.github
                    .client
                    .post(&url)
                    .json(&serde_json::json!({ "body": comment })),
            )
            .await?;

        Ok(serde_json::json!({ "issue": number, "url": created["html_url"] }))
    }
}
