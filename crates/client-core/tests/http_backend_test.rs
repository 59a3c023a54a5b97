//! HTTP Backend Integration Tests
//!
//! Runs `HttpBackend` against a small axum server on a loopback port and checks
//! how each backend answer maps onto tokens, transfer outcomes and errors.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use warmline_client_core::{BackendApi, ClientError, HttpBackend, TransferRequest};

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn transfer_request() -> TransferRequest {
    TransferRequest {
        room: "room1".to_string(),
        from_identity: "A".to_string(),
        to_identity: "B".to_string(),
        summary: String::new(),
        transcript: "caller: my bill is wrong".to_string(),
    }
}

#[tokio::test]
async fn test_issue_token() {
    let seen = Arc::new(Mutex::new(None));
    let app = Router::new()
        .route(
            "/get_token",
            post(|State(seen): State<Arc<Mutex<Option<Value>>>>, Json(body): Json<Value>| async move {
                *seen.lock() = Some(body);
                Json(json!({"token": "lk-token-A"}))
            }),
        )
        .with_state(seen.clone());
    let backend = HttpBackend::new(&serve(app).await).unwrap();

    let token = backend.issue_token("room1", "A").await.unwrap();
    assert_eq!(token, "lk-token-A");
    assert_eq!(seen.lock().clone(), Some(json!({"room": "room1", "identity": "A"})));
}

#[tokio::test]
async fn test_token_refused() {
    let app = Router::new().route(
        "/get_token",
        post(|| async { (StatusCode::FORBIDDEN, Json(json!({"detail": "Room is closed"}))) }),
    );
    let backend = HttpBackend::new(&serve(app).await).unwrap();

    let err = backend.issue_token("room1", "A").await.unwrap_err();
    assert_eq!(err, ClientError::backend(Some(403), "Room is closed"));
    assert_eq!(err.to_string(), "Room is closed");
}

#[tokio::test]
async fn test_transfer_success() {
    let seen = Arc::new(Mutex::new(None));
    let app = Router::new()
        .route(
            "/transfer",
            post(|State(seen): State<Arc<Mutex<Option<Value>>>>, Json(body): Json<Value>| async move {
                *seen.lock() = Some(body);
                Json(json!({
                    "token": "t1",
                    "summary": "caller wants billing help",
                    "audio_url": "/static/summary_room1.mp3"
                }))
            }),
        )
        .with_state(seen.clone());
    let backend = HttpBackend::new(&serve(app).await).unwrap();

    let outcome = backend.request_transfer(&transfer_request()).await.unwrap();
    assert_eq!(outcome.token, "t1");
    assert_eq!(outcome.summary.as_deref(), Some("caller wants billing help"));
    assert_eq!(outcome.audio_url.as_deref(), Some("/static/summary_room1.mp3"));

    assert_eq!(
        seen.lock().clone(),
        Some(json!({
            "room": "room1",
            "from_identity": "A",
            "to_identity": "B",
            "summary": "",
            "transcript": "caller: my bill is wrong"
        }))
    );
}

#[tokio::test]
async fn test_transfer_without_summary() {
    let app = Router::new().route("/transfer", post(|| async { Json(json!({"token": "t2", "summary": ""})) }));
    let backend = HttpBackend::new(&serve(app).await).unwrap();

    let outcome = backend.request_transfer(&transfer_request()).await.unwrap();
    assert_eq!(outcome.token, "t2");
    assert_eq!(outcome.summary, None);
    assert_eq!(outcome.audio_url, None);
}

#[tokio::test]
async fn test_transfer_detail_is_verbatim() {
    let app = Router::new().route(
        "/transfer",
        post(|| async { (StatusCode::NOT_FOUND, Json(json!({"detail": "Target agent not found"}))) }),
    );
    let backend = HttpBackend::new(&serve(app).await).unwrap();

    let err = backend.request_transfer(&transfer_request()).await.unwrap_err();
    assert_eq!(err, ClientError::backend(Some(404), "Target agent not found"));
}

#[tokio::test]
async fn test_transfer_structured_detail_is_rendered() {
    let app = Router::new().route(
        "/transfer",
        post(|| async {
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"detail": [{"loc": ["body", "room"], "msg": "field required"}]})),
            )
        }),
    );
    let backend = HttpBackend::new(&serve(app).await).unwrap();

    let err = backend.request_transfer(&transfer_request()).await.unwrap_err();
    assert_eq!(err.to_string(), r#"[{"loc":["body","room"],"msg":"field required"}]"#);
}

#[tokio::test]
async fn test_transfer_missing_token() {
    let app = Router::new().route("/transfer", post(|| async { Json(json!({"summary": "orphan summary"})) }));
    let backend = HttpBackend::new(&serve(app).await).unwrap();

    let err = backend.request_transfer(&transfer_request()).await.unwrap_err();
    assert_eq!(err, ClientError::backend(Some(200), "No token returned from backend"));
}

#[tokio::test]
async fn test_transfer_non_json_error() {
    let app = Router::new().route(
        "/transfer",
        post(|| async { (StatusCode::BAD_GATEWAY, "upstream unavailable") }),
    );
    let backend = HttpBackend::new(&serve(app).await).unwrap();

    let err = backend.request_transfer(&transfer_request()).await.unwrap_err();
    assert_eq!(err, ClientError::backend(Some(502), "No token returned from backend"));
}

#[tokio::test]
async fn test_fetch_summary() {
    let app = Router::new().route(
        "/get_summary/:room",
        get(|Path(room): Path<String>| async move {
            match room.as_str() {
                "room1" => (StatusCode::OK, Json(json!({"summary": "caller wants billing help"}))),
                "quiet" => (StatusCode::OK, Json(json!({}))),
                "blank" => (StatusCode::OK, Json(json!({"summary": ""}))),
                _ => (StatusCode::NOT_FOUND, Json(json!({"detail": "No summary"}))),
            }
        }),
    );
    let backend = HttpBackend::new(&serve(app).await).unwrap();

    assert_eq!(
        backend.fetch_summary("room1").await.unwrap().as_deref(),
        Some("caller wants billing help")
    );
    assert_eq!(backend.fetch_summary("quiet").await.unwrap(), None);
    assert_eq!(backend.fetch_summary("blank").await.unwrap(), None);
    assert_eq!(backend.fetch_summary("elsewhere").await.unwrap(), None);
}

#[tokio::test]
async fn test_unreachable_backend() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let backend = HttpBackend::new(&format!("http://{}", addr)).unwrap();

    let err = backend.issue_token("room1", "A").await.unwrap_err();
    assert!(matches!(err, ClientError::Backend { status: None, .. }));
}
