//! HTTP transport: the public chatbot endpoint plus the operator-only
//! knowledge administration endpoints.

pub mod auth;

pub use auth::{caller_id, ApiKeyVerifier, AuthFailure, IdentityVerifier};

use crate::config::CHATBOT_LIMIT;
use crate::error::{KbError, Result};
use crate::guard::Admission;
use crate::models::{Caller, ConversationMessage};
use crate::service::{IngestRequest, KnowledgeBase};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Body of `POST /api/chatbot`
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub history: Vec<ConversationMessage>,
}

pub struct HttpServer {
    knowledge: Arc<KnowledgeBase>,
    verifier: Arc<dyn IdentityVerifier>,
    allowed_origins: Vec<String>,
}

impl HttpServer {
    pub fn new(
        knowledge: Arc<KnowledgeBase>,
        verifier: Arc<dyn IdentityVerifier>,
        allowed_origins: Vec<String>,
    ) -> Self {
        Self {
            knowledge,
            verifier,
            allowed_origins,
        }
    }

    /// API keys from the environment, origins from `[http_server]`
    pub fn from_config(knowledge: Arc<KnowledgeBase>) -> Self {
        let http = knowledge.config().http_server.clone();
        let verifier = Arc::new(ApiKeyVerifier::from_config(&http));
        Self::new(knowledge, verifier, http.allowed_origins)
    }

    /// Bind and serve until the process is stopped
    pub async fn run(&self, port: u16) -> Result<()> {
        let addr = format!("127.0.0.1:{}", port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            KbError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to bind to {}: {}", addr, e),
            ))
        })?;

        log::info!("kbguard HTTP server listening on http://{}", addr);
        log::info!("Chatbot endpoint: http://{}/api/chatbot", addr);

        axum::serve(listener, self.router()).await.map_err(|e| {
            KbError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("HTTP server error: {}", e),
            ))
        })?;
        Ok(())
    }

    pub fn router(&self) -> Router {
        let cors = if self.allowed_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        let state = AppState {
            knowledge: Arc::clone(&self.knowledge),
            verifier: Arc::clone(&self.verifier),
        };

        Router::new()
            .route("/api/chatbot", post(handle_chatbot))
            .route(
                "/api/knowledge/documents",
                get(handle_list_documents).post(handle_ingest_document),
            )
            .route(
                "/api/knowledge/documents/:id",
                get(handle_get_document).delete(handle_delete_document),
            )
            .route("/health", get(handle_health))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors),
            )
            .with_state(state)
    }
}

#[derive(Clone)]
struct AppState {
    knowledge: Arc<KnowledgeBase>,
    verifier: Arc<dyn IdentityVerifier>,
}

impl AppState {
    fn authenticate(&self, headers: &HeaderMap) -> std::result::Result<Caller, Response> {
        self.verifier.verify(headers).map_err(|failure| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": failure.message() })),
            )
                .into_response()
        })
    }
}

/// `KbError` rendered as a JSON error response
struct ApiError(KbError);

impl From<KbError> for ApiError {
    fn from(e: KbError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            KbError::Forbidden(_) => StatusCode::FORBIDDEN,
            KbError::Chunking(_) | KbError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            KbError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("Request failed: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": message }))).into_response()
}

fn rate_limit_headers(limit: u32, remaining: u32, reset_secs: u64) -> [(HeaderName, HeaderValue); 3] {
    [
        (HeaderName::from_static("x-ratelimit-limit"), HeaderValue::from(limit)),
        (HeaderName::from_static("x-ratelimit-remaining"), HeaderValue::from(remaining)),
        (HeaderName::from_static("x-ratelimit-reset"), HeaderValue::from(reset_secs)),
    ]
}

async fn handle_chatbot(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let caller = match state.authenticate(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };

    // Rejected bodies do not spend the caller's quota
    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return bad_request(format!("Invalid JSON: {}", e)),
    };
    if request.message.trim().is_empty() {
        return bad_request("message must not be empty".to_string());
    }

    let limiter = state.knowledge.limiter();
    let limit = limiter.config(CHATBOT_LIMIT).map_or(0, |c| c.limit);
    let (remaining, reset_secs) = match limiter.admit_named(CHATBOT_LIMIT, &caller.id) {
        Ok(Admission::Allowed {
            remaining,
            reset_after_secs,
        }) => (remaining, reset_after_secs),
        Ok(Admission::Denied { retry_after_secs }) => {
            log::warn!("Chatbot rate limit exceeded for {}", caller.id);
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after_secs))],
                rate_limit_headers(limit, 0, retry_after_secs),
                Json(serde_json::json!({
                    "error": "Too many requests",
                    "retryAfter": retry_after_secs,
                })),
            )
                .into_response();
        }
        Err(e) => return ApiError(e).into_response(),
    };

    let reply = state.knowledge.converse(&request.message, &request.history).await;
    (
        StatusCode::OK,
        rate_limit_headers(limit, remaining, reset_secs),
        Json(reply),
    )
        .into_response()
}

async fn handle_list_documents(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let caller = match state.authenticate(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    match state.knowledge.list_documents(&caller).await {
        Ok(documents) => (StatusCode::OK, Json(documents)).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let caller = match state.authenticate(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    match state.knowledge.get_document(&caller, &document_id).await {
        Ok(Some(document)) => (StatusCode::OK, Json(document)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("Document not found: {}", document_id) })),
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn handle_ingest_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let caller = match state.authenticate(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    let request: IngestRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return bad_request(format!("Invalid JSON: {}", e)),
    };
    match state.knowledge.ingest_document(&caller, request).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let caller = match state.authenticate(&headers) {
        Ok(caller) => caller,
        Err(response) => return response,
    };
    match state.knowledge.delete_document(&caller, &document_id).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn handle_health() -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "kbguard",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}
