// =============================================================================
// REST API Endpoints — status and health surfaces
// =============================================================================
//
// The only HTTP surfaces this service exposes. Everything lives under
// `/api/v1/`; no error kind ever reaches subscribers directly — failures are
// visible here as counters and the recent-error log.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::rete::system_rules;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/channels", get(channels))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Status
// =============================================================================

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_status())
}

// =============================================================================
// Channels
// =============================================================================

#[derive(Serialize)]
struct ChannelInfo {
    channel: String,
    name: String,
    conditions: usize,
    sort_field: Option<&'static str>,
    sort_descending: bool,
}

/// The system delta channels and their definitions.
async fn channels() -> impl IntoResponse {
    let list: Vec<ChannelInfo> = system_rules::all()
        .into_iter()
        .map(|rule| ChannelInfo {
            channel: system_rules::channel_for(&rule.id).to_string(),
            name: rule.name,
            conditions: rule.conditions.len(),
            sort_field: rule.sort_field.map(|f| f.name()),
            sort_descending: rule.sort_descending,
        })
        .collect();
    Json(list)
}
