//! Regchat HTTP API
//!
//! Axum server for the chat UI and JSON API. Each endpoint has a thin axum
//! handler that delegates to an inner function returning an `ApiReply`, so the
//! request logic can be tested without going through the router.
//!
//! Endpoints:
//! - GET     /             — embedded chat page
//! - GET     /health       — store reachability
//! - POST    /chat         — answer a question within a session
//! - OPTIONS /chat         — CORS preflight, 204
//! - POST    /clear_memory — forget a session's history
//! - POST    /upload       — document preview (only when `http.upload_enabled`)
//!
//! Every response carries permissive CORS headers.

use std::sync::Arc;

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use regchat_core::config::HttpConfig;
use regchat_core::RegchatConfig;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::subsystems::chat::ChatService;
use crate::subsystems::session::SessionResolver;
use crate::subsystems::upload;

const INDEX_HTML: &str = include_str!("../static/index.html");

const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

pub const MEMORY_CLEARED: &str = "Chat memory cleared.";

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub chat: ChatService,
    pub sessions: SessionResolver,
    pub upload_enabled: bool,
}

impl HttpState {
    pub fn new(chat: ChatService, config: &RegchatConfig) -> Self {
        Self {
            chat,
            sessions: SessionResolver::new(&config.session),
            upload_enabled: config.http.upload_enabled,
        }
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    let mut router = Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler).options(chat_preflight_handler))
        .route("/clear_memory", post(clear_memory_handler));

    if state.upload_enabled {
        router = router.route(
            "/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        );
    }

    router
        .layer(middleware::map_response(apply_cors))
        .with_state(state)
}

/// Serve on the configured address until `shutdown` is cancelled.
pub async fn start_http_server(
    state: Arc<HttpState>,
    config: &HttpConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Regchat HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

async fn apply_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    response
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ChatRequest {
    pub message: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ClearMemoryRequest {
    pub session_id: Option<String>,
}

/// Status, JSON body and an optional `Set-Cookie` for a minted session.
#[derive(Debug)]
pub struct ApiReply {
    pub status: StatusCode,
    pub body: serde_json::Value,
    pub set_cookie: Option<HeaderValue>,
}

impl ApiReply {
    pub fn new(status: StatusCode, body: serde_json::Value) -> Self {
        Self {
            status,
            body,
            set_cookie: None,
        }
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(status, serde_json::json!({ "error": message.into() }))
    }

    fn with_cookie(mut self, cookie: Option<HeaderValue>) -> Self {
        self.set_cookie = cookie;
        self
    }
}

impl IntoResponse for ApiReply {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(cookie) = self.set_cookie {
            response.headers_mut().insert(header::SET_COOKIE, cookie);
        }
        response
    }
}

/// Decode an optional JSON body. Empty bodies decode to `T::default()`.
pub fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ApiReply> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        ApiReply::error(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {}", e))
    })
}

// ============================================================================
// Inner (directly testable) request logic
// ============================================================================

pub async fn chat_inner(state: &HttpState, headers: &HeaderMap, req: ChatRequest) -> ApiReply {
    let message = req.message.as_deref().map(str::trim).unwrap_or_default();
    if message.is_empty() {
        return ApiReply::error(StatusCode::BAD_REQUEST, "Missing message or session ID");
    }

    let session = match state.sessions.resolve(headers, req.session_id.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected chat request");
            return ApiReply::error(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    match state.chat.handle_chat(&session.id, message).await {
        Ok(reply) => ApiReply::new(StatusCode::OK, serde_json::json!({ "response": reply }))
            .with_cookie(state.sessions.set_cookie(&session)),
        Err(e) => {
            tracing::error!(session_id = %session.id, error = %e, "Chat request failed");
            ApiReply::error(e.status_code(), e.to_string())
        }
    }
}

pub async fn clear_memory_inner(
    state: &HttpState,
    headers: &HeaderMap,
    req: ClearMemoryRequest,
) -> ApiReply {
    let session = match state.sessions.resolve(headers, req.session_id.as_deref()) {
        Ok(s) => s,
        Err(e) => return ApiReply::error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match state.chat.clear(&session.id).await {
        Ok(_) => ApiReply::new(StatusCode::OK, serde_json::json!({ "response": MEMORY_CLEARED }))
            .with_cookie(state.sessions.set_cookie(&session)),
        Err(e) => {
            tracing::error!(session_id = %session.id, error = %e, "Clearing chat memory failed");
            ApiReply::error(e.status_code(), e.to_string())
        }
    }
}

pub async fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    let store = state.chat.store();
    match store.health().await {
        Ok(description) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": description,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": store.name(),
                "error": e.to_string(),
            }),
        ),
    }
}

/// `file` is the uploaded (filename, bytes), if the form had one.
pub fn upload_inner(file: Option<(String, Vec<u8>)>) -> ApiReply {
    let Some((raw_name, bytes)) = file else {
        return ApiReply::new(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "response": "No file uploaded." }),
        );
    };

    let filename = upload::sanitize_filename(&raw_name);
    tracing::info!(filename = %filename, bytes = bytes.len(), "File uploaded");

    match upload::preview(&filename, &bytes) {
        Ok(text) => ApiReply::new(StatusCode::OK, serde_json::json!({ "response": text })),
        Err(e) => {
            tracing::error!(filename = %filename, error = %e, "Upload extraction failed");
            ApiReply::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "response": format!("Error processing file: {}", e) }),
            )
        }
    }
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn chat_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiReply {
    match parse_body::<ChatRequest>(&body) {
        Ok(req) => chat_inner(&state, &headers, req).await,
        Err(reply) => reply,
    }
}

pub async fn chat_preflight_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn clear_memory_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiReply {
    match parse_body::<ClearMemoryRequest>(&body) {
        Ok(req) => clear_memory_inner(&state, &headers, req).await,
        Err(reply) => reply,
    }
}

pub async fn upload_handler(mut multipart: Multipart) -> ApiReply {
    let mut file = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() != Some("file") {
                    continue;
                }
                let name = field.file_name().unwrap_or_default().to_string();
                match field.bytes().await {
                    Ok(bytes) => {
                        file = Some((name, bytes.to_vec()));
                        break;
                    }
                    Err(e) => {
                        return ApiReply::new(
                            StatusCode::BAD_REQUEST,
                            serde_json::json!({ "response": format!("Error processing file: {}", e) }),
                        );
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return ApiReply::new(
                    StatusCode::BAD_REQUEST,
                    serde_json::json!({ "response": format!("Error processing file: {}", e) }),
                );
            }
        }
    }

    upload_inner(file)
}

// ============================================================================
// Unit Tests — call inner functions directly
// ============================================================================
