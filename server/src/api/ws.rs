use crate::state::AppState;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use log::warn;

/// `GET /ws`: worker node attach point.
///
/// The identity token is verified before the upgrade; the authenticated
/// node id is what the hub uses from then on, whatever the node later puts
/// in its payloads.
pub async fn node_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
) -> Response {
    let token = match headers.get("X-Auth-Token").and_then(|v| v.to_str().ok()) {
        Some(token) => token,
        None => return (StatusCode::UNAUTHORIZED, "missing auth token").into_response(),
    };

    let node_id = match state.authenticator.verify_token(token) {
        Ok(node_id) => node_id,
        Err(e) => {
            warn!("[api] node auth rejected: {e}");
            return (StatusCode::UNAUTHORIZED, "invalid auth token").into_response();
        }
    };

    let hub = state.hub.clone();
    ws.max_message_size(hub::connection::MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| hub.serve(socket, node_id))
}
