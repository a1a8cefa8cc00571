use crate::api::{handlers, middleware as api_middleware, ws};
use crate::state::AppState;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

pub fn build(state: AppState) -> Router {
    let protected = Router::new()
        .route("/parse", post(handlers::parse_gallery))
        .route("/me/balance", get(handlers::my_balance))
        .route("/me/checkin", post(handlers::checkin))
        .route("/me/reset-key", post(handlers::reset_api_key))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api_middleware::require_api_key,
        ));

    Router::new()
        .nest("/api/v1", protected)
        .route("/ws", get(ws::node_ws))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
}
