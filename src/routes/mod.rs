pub mod queue;

use axum::routing::{get, post};
use axum::Router;

use crate::middleware::api_token::require_api_token;
use crate::state::SharedState;

pub fn api_routes(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/api/v1/queue", post(queue::enqueue))
        .route("/api/v1/queue/stats", get(queue::stats))
        .route("/api/v1/queue/items/{id}", get(queue::get_item))
        .route("/api/v1/queue/process", post(queue::process_now))
        .route("/api/v1/queue/purge", post(queue::purge))
        .layer(axum::middleware::from_fn_with_state(state, require_api_token))
}
