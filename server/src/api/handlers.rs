use crate::state::AppState;
use crate::users;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use common::model::api::{BalanceResponse, CheckinResponse, ResetKeyResponse};
use common::model::entity::UserModel;
use common::model::ParseRequest;
use ledger::TxType;
use log::error;
use metrics::counter;
use rand::Rng;
use serde_json::json;

/// `POST /api/v1/parse`, the core endpoint. Blocks until a node reports
/// a result or the wait timeout fires.
pub async fn parse_gallery(
    State(state): State<AppState>,
    Extension(user): Extension<UserModel>,
    Json(req): Json<ParseRequest>,
) -> Response {
    if req.gallery_id.is_empty() || req.gallery_key.is_empty() {
        counter!("parse_requests_total", "outcome" => "invalid").increment(1);
        return error_body(StatusCode::BAD_REQUEST, "gallery_id and gallery_key are required");
    }

    match state.service.parse(&user.id, &req).await {
        Ok(response) => {
            let outcome = if response.error.is_some() {
                "failed"
            } else if response.cached {
                "cache_hit"
            } else {
                "completed"
            };
            counter!("parse_requests_total", "outcome" => outcome).increment(1);
            Json(response).into_response()
        }
        Err(e) if e.is_insufficient_balance() => {
            counter!("parse_requests_total", "outcome" => "quota").increment(1);
            error_body(StatusCode::TOO_MANY_REQUESTS, "insufficient balance")
        }
        Err(e) if e.is_validation() => {
            counter!("parse_requests_total", "outcome" => "invalid").increment(1);
            error_body(StatusCode::BAD_REQUEST, &e.to_string())
        }
        Err(e) => {
            counter!("parse_requests_total", "outcome" => "error").increment(1);
            error!("[api] parse failed: {e}");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

/// `GET /api/v1/me/balance`: available balance (balance minus frozen).
pub async fn my_balance(
    State(state): State<AppState>,
    Extension(user): Extension<UserModel>,
) -> Response {
    match state.ledger.get_account(&user.id).await {
        Ok(acc) => Json(BalanceResponse {
            balance: ledger::available(&acc),
        })
        .into_response(),
        Err(e) => {
            error!("[api] balance lookup failed: {e}");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "failed to get balance")
        }
    }
}

/// `POST /api/v1/me/checkin`: once-per-day random GP grant.
pub async fn checkin(
    State(state): State<AppState>,
    Extension(user): Extension<UserModel>,
) -> Response {
    let now = Utc::now().naive_utc();
    if users::checked_in_today(user.last_checkin_at, now) {
        let balance = state
            .ledger
            .get_account(&user.id)
            .await
            .map(|acc| ledger::available(&acc))
            .unwrap_or(0);
        return Json(CheckinResponse {
            success: false,
            reward: 0,
            balance,
            message: Some("already checked in today".into()),
        })
        .into_response();
    }

    let (min_gp, max_gp) = ordered(state.config.checkin.min_gp, state.config.checkin.max_gp);
    let reward = rand::rng().random_range(min_gp..=max_gp);

    let acc = match state
        .ledger
        .deposit(&user.id, reward, TxType::Checkin, "daily checkin")
        .await
    {
        Ok(acc) => acc,
        Err(e) => {
            error!("[api] checkin deposit failed: {e}");
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, "checkin failed");
        }
    };

    if let Err(e) = state.users.record_checkin(&user.id).await {
        error!("[api] checkin timestamp update failed: {e}");
    }

    Json(CheckinResponse {
        success: true,
        reward,
        balance: ledger::available(&acc),
        message: None,
    })
    .into_response()
}

/// `POST /api/v1/me/reset-key`: rotates the caller's API key.
pub async fn reset_api_key(
    State(state): State<AppState>,
    Extension(user): Extension<UserModel>,
) -> Response {
    match state.users.reset_api_key(&user.id).await {
        Ok(updated) => Json(ResetKeyResponse {
            api_key: updated.api_key,
        })
        .into_response(),
        Err(e) => {
            error!("[api] api key reset failed: {e}");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "failed to reset api key")
        }
    }
}

/// `GET /metrics`: Prometheus exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.prometheus {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

fn ordered(min: i64, max: i64) -> (i64, i64) {
    if min > max {
        (max, min)
    } else {
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapped_checkin_bounds_are_reordered() {
        assert_eq!(ordered(20_000, 10_000), (10_000, 20_000));
        assert_eq!(ordered(5, 5), (5, 5));
    }
}
