use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde_json::json;

/// Resolves `Authorization: Bearer <api-key>` to a user and stashes it in
/// the request extensions. 401 for unknown keys, 403 for inactive accounts.
pub async fn require_api_key(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let key = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let key = match key {
        Some(key) if !key.is_empty() => key,
        _ => return unauthorized(),
    };

    match state.users.find_by_api_key(key).await {
        Ok(Some(user)) if user.is_active() => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Ok(Some(_)) => (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "account not active"})),
        )
            .into_response(),
        Ok(None) => unauthorized(),
        Err(e) => {
            error!("[api] api key lookup failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "internal error"})),
            )
                .into_response()
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "invalid api key"})),
    )
        .into_response()
}
