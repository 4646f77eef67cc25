//! Operator endpoints: session listing, statistics and forced teardown.
//!
//! Every handler takes an [`AdminGuard`], which checks the admin bearer
//! token (`SL_ADMIN_TOKEN`).  With no token configured the guard lets
//! everything through (dev mode).

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use sl_sessions::{LinkError, SessionKey};

use super::auth::bearer_matches;
use super::sessions::SessionView;
use super::{api_error, link_error};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Guard
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Axum extractor that enforces the admin bearer token.
pub struct AdminGuard;

#[async_trait]
impl FromRequestParts<AppState> for AdminGuard {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected_hash) = &state.admin_token_hash else {
            return Ok(AdminGuard);
        };
        if !bearer_matches(&parts.headers, expected_hash) {
            return Err(api_error(StatusCode::UNAUTHORIZED, "invalid admin token"));
        }
        Ok(AdminGuard)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /admin/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_sessions(_guard: AdminGuard, State(state): State<AppState>) -> impl IntoResponse {
    let sessions: Vec<SessionView> = state.registry.list().iter().map(SessionView::from).collect();
    Json(serde_json::json!({
        "success": true,
        "count": sessions.len(),
        "sessions": sessions,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /admin/stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn stats(_guard: AdminGuard, State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "success": true,
        "stats": state.registry.stats(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /admin/sessions/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Unlike the public delete, reports 404 for unknown sessions so operators
/// notice typos.
pub async fn delete_session(
    _guard: AdminGuard,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let key = match SessionKey::resolve(&id) {
        Ok(k) => k,
        Err(e) => return link_error(e),
    };
    match state.registry.remove(&key).await {
        Some(snapshot) => {
            tracing::info!(session_key = %key, "session terminated by admin");
            Json(serde_json::json!({
                "success": true,
                "message": "Session terminated",
                "session": SessionView::from(&snapshot),
            }))
            .into_response()
        }
        None => link_error(LinkError::NotFound(key.to_string())),
    }
}
