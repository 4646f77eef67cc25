//! End-to-end HTTP tests: the real router over a registry whose transports
//! are scripted in-process.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use sl_domain::config::Config;
use sl_gateway::api;
use sl_gateway::state::AppState;
use sl_sessions::testing::{MemoryCredentialStore, ScriptedFactory};
use sl_sessions::{
    CredentialStore, SessionDeps, SessionKey, SessionRegistry, TransportError, TransportEvent,
};

fn harness(config: Config) -> (AppState, Arc<ScriptedFactory>) {
    let factory = ScriptedFactory::new();
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::default());
    let config = Arc::new(config);
    let registry = SessionRegistry::new(SessionDeps::new(factory.clone(), store, &config));
    (AppState::new(config, registry), factory)
}

async fn call(state: &AppState, method: &str, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
    let app = api::router(state.clone()).with_state(state.clone());
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(t) = token {
        req = req.header("authorization", format!("Bearer {t}"));
    }
    let resp = app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn phone_key() -> SessionKey {
    SessionKey::resolve("session_15551234567").unwrap()
}

#[tokio::test]
async fn qr_session_created_then_joined() {
    let (state, factory) = harness(Config::default());
    factory.qr_on_start("2@qr-payload");

    let (status, body) = call(&state, "GET", "/session/auth?phone=%2B15551234567&mode=qr", None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["session_id"], "session_15551234567");
    assert_eq!(body["phone"], "+15551234567");
    assert_eq!(body["qr"], "2@qr-payload");
    assert_eq!(body["qr_url"], "/session/session_15551234567/qr");
    assert_eq!(body["created"], true);

    let (status, body) = call(&state, "GET", "/session/auth?phone=15551234567&mode=qr", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], false);
    assert_eq!(factory.starts(), 1);

    let (status, body) = call(&state, "GET", "/session/15551234567", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["state"], "awaiting_linking");
    assert_eq!(body["session"]["linking_artifact_kind"], "qr");

    let (status, body) = call(&state, "GET", "/session/session_15551234567/qr", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["qr"], "2@qr-payload");
}

#[tokio::test]
async fn anonymous_qr_session_gets_unguessable_key() {
    let (state, factory) = harness(Config::default());
    factory.qr_on_start("2@anon");

    let (status, body) = call(&state, "GET", "/session/auth?mode=qr", None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let id = body["session_id"].as_str().unwrap();
    assert!(id.starts_with("qr_session_"));
    assert!(body.get("phone").map_or(true, Value::is_null));
}

#[tokio::test]
async fn pairing_code_is_grouped() {
    let (state, _factory) = harness(Config::default());

    let (status, body) =
        call(&state, "GET", "/session/auth?phone=%2B15551234567&mode=code", None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["method"], "pairing_code");
    assert_eq!(body["pairing_code"], "ABCD-1234");
    assert!(body.get("qr").is_none());
}

#[tokio::test]
async fn validation_errors_are_400() {
    let (state, factory) = harness(Config::default());

    let (status, body) = call(&state, "GET", "/session/auth?mode=code", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = call(&state, "GET", "/session/auth?phone=12345&mode=qr", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&state, "GET", "/session/auth?phone=15551234567&mode=sms", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&state, "GET", "/session/not-a-key", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(factory.starts(), 0);
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn rate_limited_pairing_is_429() {
    let (state, factory) = harness(Config::default());
    factory.pairing_code(Err(TransportError::RateLimited));

    let (status, body) =
        call(&state, "GET", "/session/auth?phone=%2B15551234567&mode=code", None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS, "{body}");
    assert_eq!(body["state"], "failed");
}

#[tokio::test(start_paused = true)]
async fn no_artifact_before_deadline_is_408() {
    let mut config = Config::default();
    config.linking.request_timeout_secs = 1;
    let (state, _factory) = harness(config);

    let (status, body) = call(&state, "GET", "/session/auth?phone=%2B15551234567&mode=qr", None).await;
    assert_eq!(status, StatusCode::REQUEST_TIMEOUT);
    assert_eq!(body["session_id"], "session_15551234567");
    // The session keeps running; the caller can poll its status.
    assert!(state.registry.get(&phone_key()).is_some());
}

#[tokio::test]
async fn delete_is_idempotent() {
    let (state, factory) = harness(Config::default());
    factory.qr_on_start("2@qr");
    call(&state, "GET", "/session/auth?phone=%2B15551234567&mode=qr", None).await;

    let (status, body) = call(&state, "DELETE", "/session/15551234567", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);
    assert_eq!(body["final_state"], "terminated");

    let (status, _) = call(&state, "GET", "/session/15551234567", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&state, "DELETE", "/session/15551234567", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], false);
}

#[tokio::test]
async fn qr_unavailable_is_404() {
    let (state, _factory) = harness(Config::default());
    let (status, body) = call(&state, "GET", "/session/15551234567/qr", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn status_reflects_link_completion() {
    let (state, factory) = harness(Config::default());
    factory.qr_on_start("2@qr");
    call(&state, "GET", "/session/auth?phone=%2B15551234567&mode=qr", None).await;

    let key = phone_key();
    assert!(
        factory
            .emit(&key, TransportEvent::Opened { identity: "15551234567".into() })
            .await
    );
    let handle = state.registry.handle(&key).unwrap();
    handle
        .wait_for(Duration::from_secs(5), |s| s.linked_identity.is_some())
        .await;

    let (status, body) = call(&state, "GET", "/session/session_15551234567", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["linked_identity"], "15551234567");
    // Artifacts are cleared once linked.
    assert!(body["session"]["linking_artifact_value"].is_null());
}

#[tokio::test]
async fn number_validation_helper() {
    let (state, _factory) = harness(Config::default());

    let (status, body) = call(&state, "GET", "/session/validate-number/+201012345678", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["normalized"], "+201012345678");

    let (_, body) = call(&state, "GET", "/session/validate-number/0100-123", None).await;
    assert_eq!(body["valid"], false);
}

#[tokio::test]
async fn api_token_guards_session_routes_only() {
    let (mut state, factory) = harness(Config::default());
    factory.qr_on_start("2@qr");
    state.api_token_hash = Some(Sha256::digest(b"api-secret").to_vec());

    let (status, _) = call(&state, "GET", "/session/auth?mode=qr", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = call(&state, "GET", "/session/auth?mode=qr", Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = call(&state, "GET", "/session/auth?mode=qr", Some("api-secret")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&state, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    let (status, _) = call(&state, "GET", "/session", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn admin_routes_list_count_and_terminate() {
    let (mut state, factory) = harness(Config::default());
    factory.qr_on_start("2@qr");
    state.admin_token_hash = Some(Sha256::digest(b"admin-secret").to_vec());

    call(&state, "GET", "/session/auth?phone=%2B15551234567&mode=qr", None).await;
    call(&state, "GET", "/session/auth?phone=%2B15557654321&mode=qr", None).await;

    let (status, _) = call(&state, "GET", "/admin/stats", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(&state, "GET", "/admin/stats", Some("admin-secret")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["total"], 2);
    assert_eq!(body["stats"]["pending"], 2);

    let (status, body) = call(&state, "GET", "/admin/sessions", Some("admin-secret")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 2);

    let (status, body) =
        call(&state, "DELETE", "/admin/sessions/15557654321", Some("admin-secret")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["state"], "terminated");

    let (status, _) =
        call(&state, "DELETE", "/admin/sessions/15550000000", Some("admin-secret")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(state.registry.len(), 1);
}
