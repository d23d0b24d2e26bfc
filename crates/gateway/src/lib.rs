//! HTTP session shell for Toolbridge.
//!
//! Exposes the reasoning loop over a small JSON API with in-memory
//! sessions:
//! - `POST /chat` runs one exchange in a session
//! - `GET /sessions`, `GET /sessions/{id}`, `DELETE /sessions/{id}`
//! - `GET /health`, with adapter state and activity totals
//!
//! Built on Axum.

pub mod activity;
pub mod sessions;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};

use toolbridge_agent::{Bridge, ExchangeRequest};
use toolbridge_config::GatewayConfig;
use toolbridge_core::message::Message;

use crate::activity::Activity;
use crate::sessions::{SessionDetail, SessionStore, SessionSummary};

/// Reply for infrastructure failures. Details go to the log only.
const UNAVAILABLE: &str = "The assistant is unavailable right now.";

/// Caller name used when a request doesn't carry one.
const DEFAULT_USER: &str = "frontendUser";

/// Shared application state for the gateway.
pub struct GatewayState {
    pub bridge: Arc<Bridge>,
    pub sessions: RwLock<SessionStore>,
    pub activity: Arc<RwLock<Activity>>,
}

impl GatewayState {
    /// Must be called inside a Tokio runtime: it starts the task that
    /// follows the bridge's events.
    pub fn new(bridge: Arc<Bridge>) -> Self {
        let activity = Arc::new(RwLock::new(Activity::default()));
        activity::track(bridge.event_bus(), activity.clone());
        Self {
            bridge,
            sessions: RwLock::new(SessionStore::new()),
            activity,
        }
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
///
/// An empty `allowed_origins` list allows any origin.
pub fn build_router(state: SharedState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .route("/sessions", get(list_sessions_handler))
        .route(
            "/sessions/{id}",
            get(get_session_handler).delete(delete_session_handler),
        )
        .layer(cors_layer(allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Start the gateway HTTP server.
pub async fn start(
    config: &GatewayConfig,
    bridge: Arc<Bridge>,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(Arc::new(GatewayState::new(bridge)), &config.allowed_origins);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    tools: usize,
    /// Adapter name to whether it is connected right now.
    adapters: BTreeMap<String, bool>,
    activity: Activity,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    let adapters = state
        .bridge
        .adapters()
        .iter()
        .map(|a| (a.name().to_string(), a.is_connected()))
        .collect();
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        tools: state.bridge.tool_count(),
        adapters,
        activity: state.activity.read().await.clone(),
    })
}

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user: Option<String>,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    session_id: String,
    tools_used: Vec<String>,
}

async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message must not be empty"));
    }

    let session_id = payload
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let user = payload.user.unwrap_or_else(|| DEFAULT_USER.to_string());

    // The lock is not held across the exchange.
    let history = state.sessions.read().await.history(&session_id);
    info!(
        session_id = %session_id,
        history = history.len(),
        message_len = payload.message.len(),
        "Chat request"
    );

    let request = ExchangeRequest::new(&payload.message)
        .with_user(user)
        .with_history(history)
        .with_conversation(&session_id);

    match state.bridge.chat(request).await {
        Ok(reply) => {
            let response = reply.content().to_string();
            state.sessions.write().await.record(
                &session_id,
                Message::user(&payload.message),
                reply.message.clone(),
            );
            Ok(Json(ChatResponse {
                response,
                session_id,
                tools_used: reply.tools_used,
            }))
        }
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Exchange failed");
            Err(api_error(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE))
        }
    }
}

#[derive(Serialize)]
struct SessionListResponse {
    sessions: Vec<SessionSummary>,
}

async fn list_sessions_handler(State(state): State<SharedState>) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: state.sessions.read().await.summaries(),
    })
}

async fn get_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    state
        .sessions
        .read()
        .await
        .get(&id)
        .map(|s| Json(s.detail()))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Session {id} not found")))
}

async fn delete_session_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.write().await.remove(&id) {
        info!(session_id = %id, "Session deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(StatusCode::NOT_FOUND, format!("Session {id} not found")))
    }
}
