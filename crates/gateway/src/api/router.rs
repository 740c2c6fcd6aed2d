//! Route table and shared middleware layers.

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::{runs, toolcalls};
use crate::state::AppState;
use crate::ws;

pub fn build_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .server
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_credentials(true)
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/api/runs/", post(runs::start_run))
        .route("/api/runs/:run_id/spawn_subrun/", post(runs::spawn_subrun))
        .route("/api/runs/:run_id/snapshot/", get(runs::snapshot))
        .route("/api/toolcalls/:tool_call_id/approve/", post(toolcalls::approve))
        .route("/ws/ui/workspace/", get(ws::workspace::workspace_ws))
        .route("/ws/ui/run/:run_id/", get(ws::run::run_ws))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
