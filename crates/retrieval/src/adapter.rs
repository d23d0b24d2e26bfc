//! [`ToolAdapter`] over a REST document index.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::Instant;
use toolbridge_config::RetrievalConfig;
use toolbridge_core::adapter::{CallContext, ToolAdapter};
use toolbridge_core::error::AdapterError;
use toolbridge_core::tool::{ToolDescriptor, ToolOutcome};
use tracing::{debug, error, info, warn};

use crate::error::{Result, RetrievalError};
use crate::evidence::{CachedDocument, DocumentCache, EvidenceSet, PathNormalizer, parse_query_response};

/// Name of the single tool this adapter provides.
pub const QUERY_TOOL: &str = "query";

const NO_RESULTS: &str =
    "No relevant documents found for this query. Please try a different search term.";

/// What a query returned.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Evidence(EvidenceSet),
    /// A body in a shape we don't understand, passed through as-is.
    Raw(Value),
}

/// Adapter exposing a `query` tool backed by `POST <server>/query`.
///
/// Connection attempts are spaced at least `connect_retry_interval` apart
/// unless forced. Timed-out queries are retried with a fixed backoff.
/// Unreachable servers and 404/500/502/503 responses mark the adapter
/// disconnected so the next exchange tries to reconnect.
pub struct RetrievalAdapter {
    name: String,
    base_url: String,
    client: reqwest::Client,
    connect_timeout: Duration,
    query_timeout: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
    connect_retry_interval: Duration,
    normalizer: PathNormalizer,
    connected: AtomicBool,
    last_attempt: Mutex<Option<Instant>>,
    cache: Mutex<DocumentCache>,
}

impl RetrievalAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::from_config(&RetrievalConfig {
            server_url: base_url.into(),
            ..RetrievalConfig::default()
        })
    }

    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            name: "retrieval".into(),
            base_url: config.server_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            max_attempts: config.max_retries.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            connect_retry_interval: Duration::from_secs(config.connect_retry_interval_secs),
            normalizer: PathNormalizer::new(&config.storage_marker, &config.public_prefix),
            connected: AtomicBool::new(false),
            last_attempt: Mutex::new(None),
            cache: Mutex::new(DocumentCache::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    pub fn with_connect_retry_interval(mut self, interval: Duration) -> Self {
        self.connect_retry_interval = interval;
        self
    }

    pub fn normalizer(&self) -> &PathNormalizer {
        &self.normalizer
    }

    /// Latest cached content for a document, by raw or normalized path.
    pub fn document(&self, path: &str) -> Option<CachedDocument> {
        let id = self.normalizer.normalize(path);
        self.cache.lock().ok()?.get(&id).cloned()
    }

    fn endpoint(&self) -> String {
        format!("{}/query", self.base_url)
    }

    fn mark_disconnected(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(adapter = %self.name, "Document server marked disconnected");
        }
    }

    /// Run one search against the index.
    pub async fn search(&self, text: &str) -> Result<QueryResult> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            let sent = self
                .client
                .post(self.endpoint())
                .timeout(self.query_timeout)
                .json(&json!({ "query": text }))
                .send()
                .await;
            match sent {
                Ok(response) => break response,
                Err(e) if e.is_timeout() => {
                    if attempt >= self.max_attempts {
                        return Err(RetrievalError::Timeout { attempts: attempt });
                    }
                    warn!(
                        adapter = %self.name,
                        attempt,
                        max_attempts = self.max_attempts,
                        "Query timed out, retrying"
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => return Err(RetrievalError::Unreachable(e.to_string())),
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Status {
                status: status.as_u16(),
            });
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| RetrievalError::InvalidResponse(e.to_string()))?;

        match parse_query_response(&body, text, &self.normalizer) {
            Some(set) => {
                if let Ok(mut cache) = self.cache.lock() {
                    for item in &set.items {
                        cache.record(&item.path, &item.content);
                    }
                }
                Ok(QueryResult::Evidence(set))
            }
            None => Ok(QueryResult::Raw(body)),
        }
    }
}

/// Search text from the call arguments: `text`, the `query` alias, or a
/// bare string.
fn search_text(arguments: &Value) -> Option<&str> {
    match arguments {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map
            .get("text")
            .or_else(|| map.get("query"))
            .and_then(Value::as_str),
        _ => None,
    }
}

fn evidence_outcome(set: EvidenceSet) -> ToolOutcome {
    if set.is_empty() {
        return ToolOutcome::Success(json!({
            "result": NO_RESULTS,
            "query": set.query,
            "sources": [],
            "source_paths": [],
            "no_results": true,
        }));
    }
    let sources: Vec<Value> = set
        .items
        .iter()
        .enumerate()
        .map(|(i, e)| json!({ "index": i + 1, "path": e.path }))
        .collect();
    let text = set.to_tool_text();
    let paths = set.paths();
    ToolOutcome::Success(json!({
        "result": text,
        "query": set.query,
        "sources": sources,
        "source_paths": paths,
    }))
}

#[async_trait]
impl ToolAdapter for RetrievalAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self, force: bool) -> std::result::Result<(), AdapterError> {
        if self.is_connected() && !force {
            return Ok(());
        }

        {
            let mut last = self
                .last_attempt
                .lock()
                .map_err(|_| AdapterError::ConnectFailed("connect state poisoned".into()))?;
            if !force
                && let Some(at) = *last
                && at.elapsed() < self.connect_retry_interval
            {
                let wait = self.connect_retry_interval - at.elapsed();
                debug!(adapter = %self.name, wait_ms = wait.as_millis() as u64, "Connect attempt throttled");
                return Err(AdapterError::ConnectFailed(format!(
                    "document server unavailable, next attempt in {}s",
                    wait.as_secs().max(1)
                )));
            }
            *last = Some(Instant::now());
        }

        let result = self
            .client
            .post(self.endpoint())
            .timeout(self.connect_timeout)
            .json(&json!({ "query": "test" }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                self.connected.store(true, Ordering::SeqCst);
                info!(adapter = %self.name, url = %self.base_url, "Connected to document server");
                Ok(())
            }
            Ok(response) => {
                self.connected.store(false, Ordering::SeqCst);
                let status = response.status().as_u16();
                warn!(adapter = %self.name, status, "Document server rejected connection test");
                Err(AdapterError::ConnectFailed(format!(
                    "{} answered HTTP {status}",
                    self.base_url
                )))
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                warn!(adapter = %self.name, error = %e, "Document server unreachable");
                Err(AdapterError::ConnectFailed(e.to_string()))
            }
        }
    }

    async fn list_tools(&self) -> std::result::Result<Vec<ToolDescriptor>, AdapterError> {
        Ok(vec![ToolDescriptor {
            name: QUERY_TOOL.into(),
            description: "Find information in local documents (PDF, CSV, DOCX, MD, TXT). \
                          Cite every fact as [Source: <path>] using the paths returned."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "The text to search for in the documents"
                    }
                },
                "required": ["text"]
            }),
            glyph: Some("📚".into()),
        }])
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        ctx: &CallContext,
    ) -> std::result::Result<ToolOutcome, AdapterError> {
        if name != QUERY_TOOL {
            return Err(AdapterError::UnknownTool(name.to_string()));
        }
        if !self.is_connected() && self.connect(false).await.is_err() {
            return Ok(ToolOutcome::failure("Document server is not available"));
        }

        let Some(text) = search_text(&arguments).filter(|t| !t.trim().is_empty()) else {
            return Ok(ToolOutcome::failure(RetrievalError::EmptyQuery.to_string()));
        };
        debug!(adapter = %self.name, user = %ctx.user, query = text, "Querying document server");

        let started = Instant::now();
        match self.search(text).await {
            Ok(QueryResult::Evidence(set)) => {
                info!(
                    adapter = %self.name,
                    sources = set.items.len(),
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Query answered"
                );
                Ok(evidence_outcome(set))
            }
            Ok(QueryResult::Raw(body)) => Ok(ToolOutcome::Success(json!({ "result": body }))),
            Err(e) => {
                if e.is_disconnect() {
                    error!(adapter = %self.name, error = %e, "Document server failed");
                    self.mark_disconnected();
                } else {
                    warn!(adapter = %self.name, error = %e, "Query failed");
                }
                Ok(ToolOutcome::failure(e.to_string()))
            }
        }
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;

    #[derive(Clone)]
    struct Mock {
        hits: Arc<AtomicUsize>,
        status: Arc<Mutex<StatusCode>>,
        body: Arc<Mutex<Value>>,
        delay_first: Option<Duration>,
    }

    impl Mock {
        fn new(body: Value) -> Self {
            Self {
                hits: Arc::new(AtomicUsize::new(0)),
                status: Arc::new(Mutex::new(StatusCode::OK)),
                body: Arc::new(Mutex::new(body)),
                delay_first: None,
            }
        }

        fn hits(&self) -> usize {
            self.hits.load(Ordering::SeqCst)
        }

        fn set_status(&self, status: StatusCode) {
            *self.status.lock().unwrap() = status;
        }
    }

    async fn handle(State(mock): State<Mock>, axum::Json(req): axum::Json<Value>) -> (StatusCode, axum::Json<Value>) {
        let n = mock.hits.fetch_add(1, Ordering::SeqCst);
        // The connection test is never delayed.
        if req["query"] != "test"
            && let Some(delay) = mock.delay_first
            && n <= 1
        {
            tokio::time::sleep(delay).await;
        }
        let status = *mock.status.lock().unwrap();
        let body = mock.body.lock().unwrap().clone();
        (status, axum::Json(body))
    }

    async fn serve(mock: Mock) -> String {
        let app = Router::new().route("/query", post(handle)).with_state(mock);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn handbook_body() -> Value {
        json!({
            "result": {
                "output": "Dogs are welcome on Fridays.",
                "links": ["file:///data/md_db/pet-policy.md", "file:///data/md_db/office/hours.md"]
            }
        })
    }

    #[tokio::test]
    async fn query_returns_numbered_sources() {
        let mock = Mock::new(handbook_body());
        let adapter = RetrievalAdapter::new(serve(mock.clone()).await);
        adapter.connect(false).await.unwrap();
        assert!(adapter.is_connected());

        let outcome = adapter
            .call_tool(QUERY_TOOL, json!({"text": "pets"}), &CallContext::default())
            .await
            .unwrap();
        let ToolOutcome::Success(value) = outcome else {
            panic!("expected success");
        };
        assert_eq!(
            value["source_paths"],
            json!(["handbook.hypha.coop/pet-policy", "handbook.hypha.coop/office/hours"])
        );
        assert_eq!(value["sources"][1]["index"], 2);
        assert!(value["result"].as_str().unwrap().contains("[1] \"handbook.hypha.coop/pet-policy\""));
        assert_eq!(mock.hits(), 2);

        let doc = adapter.document("file:///other/md_db/pet-policy.md").unwrap();
        assert_eq!(doc.revision, 1);
        assert_eq!(doc.content, "Dogs are welcome on Fridays.");
    }

    #[tokio::test]
    async fn query_alias_and_bare_string() {
        let mock = Mock::new(handbook_body());
        let adapter = RetrievalAdapter::new(serve(mock).await);
        adapter.connect(false).await.unwrap();

        for args in [json!({"query": "pets"}), json!("pets")] {
            let outcome = adapter.call_tool(QUERY_TOOL, args, &CallContext::default()).await.unwrap();
            assert!(outcome.is_success());
        }
        let empty = adapter
            .call_tool(QUERY_TOOL, json!({"text": "  "}), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(empty, ToolOutcome::failure("No search text provided"));
    }

    #[tokio::test]
    async fn empty_result_is_reported() {
        let mock = Mock::new(json!({"result": {"output": "", "links": []}}));
        let adapter = RetrievalAdapter::new(serve(mock).await);
        adapter.connect(false).await.unwrap();

        let outcome = adapter
            .call_tool(QUERY_TOOL, json!({"text": "unicorns"}), &CallContext::default())
            .await
            .unwrap();
        let ToolOutcome::Success(value) = outcome else {
            panic!("expected success");
        };
        assert_eq!(value["no_results"], true);
        assert_eq!(value["result"], NO_RESULTS);
        assert_eq!(value["source_paths"], json!([]));
    }

    #[tokio::test]
    async fn unknown_shape_passes_through() {
        let mock = Mock::new(json!({"answer": 42}));
        let adapter = RetrievalAdapter::new(serve(mock).await);
        adapter.connect(false).await.unwrap();

        let outcome = adapter
            .call_tool(QUERY_TOOL, json!({"text": "x"}), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, ToolOutcome::Success(json!({"result": {"answer": 42}})));
    }

    #[tokio::test]
    async fn server_errors_disconnect() {
        let mock = Mock::new(handbook_body());
        let adapter = RetrievalAdapter::new(serve(mock.clone()).await);
        adapter.connect(false).await.unwrap();

        mock.set_status(StatusCode::BAD_GATEWAY);
        let outcome = adapter
            .call_tool(QUERY_TOOL, json!({"text": "pets"}), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, ToolOutcome::failure("Error calling query API: HTTP 502"));
        assert!(!adapter.is_connected());
    }

    #[tokio::test]
    async fn client_errors_keep_connection() {
        let mock = Mock::new(handbook_body());
        let adapter = RetrievalAdapter::new(serve(mock.clone()).await);
        adapter.connect(false).await.unwrap();

        mock.set_status(StatusCode::BAD_REQUEST);
        let outcome = adapter
            .call_tool(QUERY_TOOL, json!({"text": "pets"}), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, ToolOutcome::failure("Error calling query API: HTTP 400"));
        assert!(adapter.is_connected());
    }

    #[tokio::test]
    async fn timed_out_query_is_retried() {
        let mut mock = Mock::new(handbook_body());
        mock.delay_first = Some(Duration::from_millis(400));
        let adapter = RetrievalAdapter::new(serve(mock.clone()).await)
            .with_query_timeout(Duration::from_millis(100))
            .with_retries(3, Duration::from_millis(10));
        adapter.connect(false).await.unwrap();

        // Hit 0 is the connection test, hit 1 times out, hit 2 answers.
        let outcome = adapter
            .call_tool(QUERY_TOOL, json!({"text": "pets"}), &CallContext::default())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(mock.hits(), 3);
    }

    #[tokio::test]
    async fn timeouts_give_up_after_max_attempts() {
        let mut mock = Mock::new(handbook_body());
        mock.delay_first = Some(Duration::from_millis(400));
        let adapter = RetrievalAdapter::new(serve(mock.clone()).await)
            .with_query_timeout(Duration::from_millis(100))
            .with_retries(1, Duration::from_millis(10));
        adapter.connect(false).await.unwrap();

        let outcome = adapter
            .call_tool(QUERY_TOOL, json!({"text": "pets"}), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, ToolOutcome::failure("Query timed out after 1 attempt(s)"));
        assert!(adapter.is_connected());
    }

    #[tokio::test]
    async fn connect_attempts_are_throttled() {
        // Bind then drop a listener to get a port nobody answers on.
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let adapter = RetrievalAdapter::new(format!("http://{addr}"))
            .with_connect_retry_interval(Duration::from_secs(60));

        assert!(adapter.connect(false).await.is_err());
        let throttled = adapter.connect(false).await.unwrap_err();
        assert!(throttled.to_string().contains("next attempt"));

        // Calls while down fail softly instead of erroring the exchange.
        let outcome = adapter
            .call_tool(QUERY_TOOL, json!({"text": "pets"}), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(outcome, ToolOutcome::failure("Document server is not available"));
    }

    #[tokio::test]
    async fn forced_connect_skips_throttle() {
        let mock = Mock::new(handbook_body());
        mock.set_status(StatusCode::SERVICE_UNAVAILABLE);
        let adapter = RetrievalAdapter::new(serve(mock.clone()).await)
            .with_connect_retry_interval(Duration::from_secs(60));

        assert!(adapter.connect(false).await.is_err());
        mock.set_status(StatusCode::OK);
        assert!(adapter.connect(false).await.is_err());
        assert_eq!(mock.hits(), 1);

        adapter.connect(true).await.unwrap();
        assert!(adapter.is_connected());
        assert_eq!(mock.hits(), 2);
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let adapter = RetrievalAdapter::new("http://127.0.0.1:1");
        let err = adapter
            .call_tool("search", json!({}), &CallContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn lists_single_query_tool() {
        let adapter = RetrievalAdapter::new("http://127.0.0.1:1").with_name("handbook");
        let tools = adapter.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, QUERY_TOOL);
        assert_eq!(tools[0].input_schema["required"], json!(["text"]));
        assert_eq!(adapter.name(), "handbook");
    }
}
