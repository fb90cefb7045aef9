pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the job route tree.
///
/// ```text
/// /pull                  submit a pull (POST)
/// /clone                 submit a clone/sync (POST)
/// /adjust                submit an adjust (POST)
/// /cancel/{job_id}       cancel a running job (POST)
/// /ws/{job_id}           live job log (WebSocket)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/pull", post(handlers::jobs::pull))
        .route("/clone", post(handlers::jobs::clone_repo))
        .route("/adjust", post(handlers::jobs::adjust))
        .route("/cancel/{job_id}", post(handlers::jobs::cancel))
        .route("/ws/{job_id}", get(ws::ws_handler))
}
