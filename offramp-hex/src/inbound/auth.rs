//! Admin token middleware for operator routes.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use offramp_types::OrderRepository;

use super::handlers::AppState;

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub(crate) fn extract_bearer(auth_header: Option<&str>) -> Option<&str> {
    auth_header?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

pub(crate) fn tokens_match(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

/// Guards admin routes with the configured bearer token.
///
/// Without a configured token the routes answer 503 instead of running
/// unauthenticated.
pub async fn admin_auth_middleware<R: OrderRepository>(
    State(state): State<Arc<AppState<R>>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        tracing::warn!(path = %request.uri().path(), "admin route called but OFFRAMP_ADMIN_TOKEN is not set");
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "Admin API is disabled: no admin token configured",
        );
    };

    let presented = extract_bearer(
        request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    );

    match presented {
        Some(token) if tokens_match(expected, token) => next.run(request).await,
        Some(_) => error_response(StatusCode::UNAUTHORIZED, "Invalid admin token"),
        None => error_response(
            StatusCode::UNAUTHORIZED,
            "Missing or invalid Authorization header",
        ),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": message,
            "code": status.as_u16()
        })),
    )
        .into_response()
}
