//! Session endpoints.
//!
//! - `GET    /session/auth?phone=&mode=qr|code`: create (or join) a session
//!   and wait for its first linking artifact
//! - `GET    /session/:id`: status projection
//! - `DELETE /session/:id`: explicit teardown (idempotent)
//! - `GET    /session/:id/qr`: raw QR payload
//! - `GET    /session/validate-number/:number`: phone format check
//! - `GET    /session`: service info
//! - `GET    /health`: liveness probe
//!
//! `:id` is either a session key (`session_…`, `qr_session_…`) or a phone
//! number, which resolves to the matching `session_<digits>` key.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sl_domain::config::LinkingMethod;
use sl_sessions::{
    ArtifactKind, CreateRequest, LinkError, PhoneNumber, SessionKey, SessionState,
    StatusSnapshot, TransportError,
};

use super::{api_error, link_error};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status projection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What callers see of a session.  Never the live session itself.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub method: LinkingMethod,
    pub state: SessionState,
    pub linking_artifact_kind: Option<ArtifactKind>,
    pub linking_artifact_value: Option<String>,
    pub linked_identity: Option<String>,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
}

impl From<&StatusSnapshot> for SessionView {
    fn from(s: &StatusSnapshot) -> Self {
        Self {
            session_id: s.key.to_string(),
            method: s.method,
            state: s.state,
            linking_artifact_kind: s.artifact_kind(),
            linking_artifact_value: s.linking_artifact.as_ref().map(|a| a.value().to_string()),
            linked_identity: s.linked_identity.clone(),
            last_error: s.last_error.clone(),
            reconnect_attempts: s.reconnect_attempts,
            created_at: s.created_at,
            last_event_at: s.last_event_at,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /session/auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    #[serde(default, alias = "number")]
    pub phone: Option<String>,
    #[serde(default, alias = "method")]
    pub mode: Option<String>,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    success: bool,
    session_id: String,
    phone: Option<String>,
    method: LinkingMethod,
    state: SessionState,
    /// `false` when an in-progress session for the same key was joined.
    created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    qr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    qr_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pairing_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    linked_identity: Option<String>,
    timestamp: DateTime<Utc>,
}

/// The caller has something to act on: an artifact to show, a completed
/// link, or a definitive failure.
fn ready_for_caller(s: &StatusSnapshot) -> bool {
    s.linking_artifact.is_some() || s.state.is_linked() || s.state.is_terminal()
}

pub async fn auth(State(state): State<AppState>, Query(q): Query<AuthQuery>) -> Response {
    let method = match q.mode.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        Some(raw) => match LinkingMethod::parse(raw) {
            Some(m) => m,
            None => return link_error(LinkError::UnsupportedMethod(raw.to_string())),
        },
        None => state.config.linking.default_method,
    };

    let phone = match q.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(raw) => match PhoneNumber::normalize(raw, state.phone_rules) {
            Ok(p) => Some(p),
            Err(e) => return link_error(e),
        },
        None => None,
    };

    let key = match &phone {
        Some(p) => SessionKey::for_phone(p),
        None => SessionKey::anonymous(),
    };

    let (handle, created) = match state.registry.get_or_create(CreateRequest {
        key: key.clone(),
        method,
        phone: phone.clone(),
    })
    .await
    {
        Ok(pair) => pair,
        Err(e) => return link_error(e),
    };
    tracing::info!(session_key = %key, method = %method, created, "session requested");

    let timeout = Duration::from_secs(state.config.linking.request_timeout_secs);
    let snapshot = handle.wait_for(timeout, ready_for_caller).await;

    if !ready_for_caller(&snapshot) {
        tracing::warn!(session_key = %key, state = %snapshot.state, "no linking artifact before request timeout");
        return (
            StatusCode::REQUEST_TIMEOUT,
            Json(serde_json::json!({
                "success": false,
                "error": "Request timeout",
                "session_id": key.as_str(),
                "state": snapshot.state,
            })),
        )
            .into_response();
    }

    if snapshot.state.is_terminal() {
        return failure_response(&snapshot);
    }

    let qr = snapshot.qr().map(str::to_string);
    let qr_url = qr.as_ref().map(|_| format!("/session/{key}/qr"));
    Json(AuthResponse {
        success: true,
        session_id: key.to_string(),
        phone: phone.as_ref().map(PhoneNumber::international),
        method: snapshot.method,
        state: snapshot.state,
        created,
        qr,
        qr_url,
        pairing_code: snapshot.pairing_code().map(str::to_string),
        linked_identity: snapshot.linked_identity.clone(),
        timestamp: Utc::now(),
    })
    .into_response()
}

/// A session that failed before producing an artifact.  Network refusals
/// keep their meaning for the caller: a rejected number is a bad request,
/// throttling is 429.
fn failure_response(snapshot: &StatusSnapshot) -> Response {
    let error = snapshot
        .last_error
        .clone()
        .unwrap_or_else(|| format!("session ended in state {}", snapshot.state));
    let status = if error.ends_with(&TransportError::RateLimited.to_string()) {
        StatusCode::TOO_MANY_REQUESTS
    } else if error.ends_with(&TransportError::InvalidIdentity.to_string()) {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(serde_json::json!({
            "success": false,
            "error": error,
            "session_id": snapshot.key.as_str(),
            "state": snapshot.state,
        })),
    )
        .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET / DELETE /session/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let key = match SessionKey::resolve(&id) {
        Ok(k) => k,
        Err(e) => return link_error(e),
    };
    match state.registry.get(&key) {
        Some(snapshot) => Json(serde_json::json!({
            "success": true,
            "session": SessionView::from(&snapshot),
        }))
        .into_response(),
        None => link_error(LinkError::NotFound(key.to_string())),
    }
}

pub async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let key = match SessionKey::resolve(&id) {
        Ok(k) => k,
        Err(e) => return link_error(e),
    };
    let removed = state.registry.remove(&key).await;
    tracing::info!(session_key = %key, deleted = removed.is_some(), "session delete requested");
    Json(serde_json::json!({
        "success": true,
        "session_id": key.as_str(),
        "deleted": removed.is_some(),
        "final_state": removed.map(|s| s.state),
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /session/:id/qr
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_qr(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let key = match SessionKey::resolve(&id) {
        Ok(k) => k,
        Err(e) => return link_error(e),
    };
    let qr = state
        .registry
        .get(&key)
        .and_then(|s| s.qr().map(str::to_string));
    match qr {
        Some(qr) => Json(serde_json::json!({
            "success": true,
            "session_id": key.as_str(),
            "qr": qr,
        }))
        .into_response(),
        None => api_error(
            StatusCode::NOT_FOUND,
            "QR code not available, create a session with mode=qr first",
        ),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn validate_number(
    State(state): State<AppState>,
    Path(number): Path<String>,
) -> impl IntoResponse {
    let rules = state.phone_rules;
    let parsed = PhoneNumber::parse(&number, rules).ok();
    let message = match parsed {
        Some(_) => "Valid phone number format".to_string(),
        None => format!(
            "Invalid format. Use an optional + followed by {}-{} digits, country code included",
            rules.min_digits, rules.max_digits
        ),
    };
    Json(serde_json::json!({
        "success": true,
        "number": number,
        "valid": parsed.is_some(),
        "normalized": parsed.as_ref().map(PhoneNumber::international),
        "message": message,
    }))
}

pub async fn service_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "success": true,
        "service": "session-linker",
        "version": env!("CARGO_PKG_VERSION"),
        "default_method": state.config.linking.default_method,
        "endpoints": {
            "create_session": "GET /session/auth?phone=+15551234567&mode=qr|code",
            "session_status": "GET /session/:id",
            "delete_session": "DELETE /session/:id",
            "qr_data": "GET /session/:id/qr",
            "validate_number": "GET /session/validate-number/:number",
        },
        "notes": [
            "Phone numbers must include the country code",
            "The session credential is sent to the linked account once linking completes",
            format!(
                "Sessions are torn down {} seconds after delivery",
                state.config.delivery.cleanup_grace_secs
            ),
        ],
    }))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.registry.len(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}
