pub mod admin;
pub mod auth;
pub mod sessions;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get};
use axum::Router;
use sl_sessions::LinkError;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (health, service info, number
/// validation), **protected** (session endpoints, gated behind the
/// `SL_API_TOKEN` bearer-token middleware) and **admin** (gated per
/// handler by [`admin::AdminGuard`]).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/health", get(sessions::health))
        .route("/session", get(sessions::service_info))
        .route(
            "/session/validate-number/:number",
            get(sessions::validate_number),
        );

    let protected = Router::new()
        .route("/session/auth", get(sessions::auth))
        .route(
            "/session/:id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/session/:id/qr", get(sessions::get_qr))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    let admin = Router::new()
        .route("/admin/sessions", get(admin::list_sessions))
        .route("/admin/sessions/:id", delete(admin::delete_session))
        .route("/admin/stats", get(admin::stats));

    public.merge(protected).merge(admin)
}

/// Build a standardized JSON error response:
/// `{ "success": false, "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "success": false, "error": message.into() })),
    )
        .into_response()
}

/// Map a registry error to its HTTP status.
pub(crate) fn link_error(err: LinkError) -> Response {
    let status = match &err {
        LinkError::InvalidPhone(_)
        | LinkError::InvalidSessionKey(_)
        | LinkError::UnsupportedMethod(_)
        | LinkError::PhoneRequired => StatusCode::BAD_REQUEST,
        LinkError::NotFound(_) => StatusCode::NOT_FOUND,
        LinkError::ActorShutdown => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, err.to_string())
}
