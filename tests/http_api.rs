//! HTTP surface: authentication, rate limiting and status mapping.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use kbguard::cache::MemoryCacheBackend;
use kbguard::config::{RateLimitConfig, CHATBOT_LIMIT};
use kbguard::documents::MemoryDocumentStore;
use kbguard::http::{ApiKeyVerifier, HttpServer};
use kbguard::index::MemoryVectorStore;
use kbguard::testing::{FakeEmbedder, FakeGenerator};
use kbguard::{Collaborators, Config, KnowledgeBase};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

const OPERATOR_KEY: &str = "ops-secret";

fn app(chatbot_limit: u32) -> Router {
    let mut config = Config::default();
    config.chunking.chunk_size = 100;
    config.chunking.chunk_overlap = 20;
    config
        .rate_limits
        .insert(CHATBOT_LIMIT.to_string(), RateLimitConfig::new(chatbot_limit, 60));

    let parts = Collaborators {
        documents: Arc::new(MemoryDocumentStore::new()),
        vectors: Arc::new(MemoryVectorStore::new()),
        embedder: Arc::new(FakeEmbedder::new(64)),
        generator: Arc::new(FakeGenerator::replying("Open the Reports tab.")),
        cache: Arc::new(MemoryCacheBackend::new(64)),
    };
    let kb = Arc::new(KnowledgeBase::new(config, parts));
    let verifier = Arc::new(ApiKeyVerifier::new(Some(OPERATOR_KEY.to_string()), None));
    HttpServer::new(kb, verifier, Vec::new()).router()
}

fn chat(caller: &str, message: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chatbot")
        .header("content-type", "application/json")
        .header("x-caller-id", caller)
        .body(Body::from(json!({ "message": message }).to_string()))
        .unwrap()
}

fn operator_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", OPERATOR_KEY))
        .header("content-type", "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_chatbot_replies() {
    let response = app(5).oneshot(chat("visitor-1", "How do I export a report?")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "5");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "4");
    assert_eq!(json_body(response).await["reply"], "Open the Reports tab.");
}

#[tokio::test]
async fn test_chatbot_rate_limited_per_caller() {
    let app = app(2);
    for _ in 0..2 {
        let response = app.clone().oneshot(chat("visitor-1", "hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let denied = app.clone().oneshot(chat("visitor-1", "hello")).await.unwrap();
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = denied.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!(retry_after >= 1);
    assert_eq!(denied.headers()["x-ratelimit-remaining"], "0");
    assert_eq!(denied.headers()["x-ratelimit-limit"], "2");

    // A different caller has its own bucket
    let other = app.oneshot(chat("visitor-2", "hello")).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_chatbot_rejects_empty_message() {
    let response = app(5).oneshot(chat("visitor-1", "   ")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rejected_messages_do_not_spend_quota() {
    let app = app(1);
    for _ in 0..3 {
        let response = app.clone().oneshot(chat("visitor-1", "")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
    let malformed = Request::builder()
        .method("POST")
        .uri("/api/chatbot")
        .header("content-type", "application/json")
        .header("x-caller-id", "visitor-1")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(malformed).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.oneshot(chat("visitor-1", "hello")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
}

#[tokio::test]
async fn test_knowledge_routes_require_operator() {
    let app = app(5);

    let anonymous = Request::builder()
        .method("GET")
        .uri("/api/knowledge/documents")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(anonymous).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let wrong_scheme = Request::builder()
        .method("GET")
        .uri("/api/knowledge/documents")
        .header("authorization", "Token abc")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(wrong_scheme).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_document_lifecycle() {
    let app = app(5);

    let ingest = operator_request(
        "POST",
        "/api/knowledge/documents",
        Some(json!({
            "documentId": "D1",
            "filename": "d1.md",
            "text": "z".repeat(250),
            "tags": ["onboarding"]
        })),
    );
    let response = app.clone().oneshot(ingest).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = json_body(response).await;
    assert_eq!(report["chunksCount"], 3);
    assert_eq!(report["failedChunks"], json!([]));

    let response = app
        .clone()
        .oneshot(operator_request("GET", "/api/knowledge/documents", None))
        .await
        .unwrap();
    let listing = json_body(response).await;
    assert_eq!(listing[0]["documentId"], "D1");
    assert_eq!(listing[0]["tags"], json!(["onboarding"]));

    let response = app
        .clone()
        .oneshot(operator_request("DELETE", "/api/knowledge/documents/D1", None))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["deletedCount"], 3);

    let response = app
        .oneshot(operator_request("GET", "/api/knowledge/documents/D1", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_empty_document_is_bad_request() {
    let ingest = operator_request(
        "POST",
        "/api/knowledge/documents",
        Some(json!({ "documentId": "blank", "text": "   " })),
    );
    let response = app(5).oneshot(ingest).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health() {
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app(5).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}
