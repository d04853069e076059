use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::api::health::{BookHealth, CycleCounters, HealthState};
use crate::api::latency::{LatencyStats, LatencySummary};
use crate::error::AppError;
use crate::types::Snapshot;
use crate::ws::messages::ViewerMessage;
use crate::ws::viewer::serve_viewer;

#[derive(Clone)]
pub struct ApiState {
    pub snapshots: watch::Receiver<Arc<Snapshot>>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub shutdown: watch::Receiver<bool>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/odds", get(get_odds))
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub stale: bool,
    pub cycle: u64,
    pub snapshot_at: DateTime<Utc>,
    pub last_success: Option<DateTime<Utc>>,
    pub seconds_since_last_success: Option<i64>,
    pub viewers: usize,
    pub fair_value_available: bool,
    pub cache_enabled: bool,
    pub cache_write_failures: u64,
    pub last_cycle: CycleCounters,
    pub books: BTreeMap<String, BookHealth>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ApiState>) -> impl IntoResponse {
    let ApiState { snapshots, health, shutdown, .. } = state;
    ws.on_upgrade(move |socket| serve_viewer(socket, snapshots, shutdown, health))
}

/// REST fallback: the same frame a viewer receives over the socket.
async fn get_odds(State(state): State<ApiState>) -> Result<Json<serde_json::Value>, AppError> {
    let snapshot = state.snapshots.borrow().clone();
    Ok(Json(serde_json::to_value(ViewerMessage::Snapshot(&snapshot))?))
}

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let snapshot = state.snapshots.borrow().clone();
    let last_success = state.health.last_success();
    let books = state
        .health
        .books
        .iter()
        .map(|e| (e.key().clone(), e.value().clone()))
        .collect();

    Json(HealthResponse {
        status: if snapshot.stale { "stale" } else { "ok" },
        stale: snapshot.stale,
        cycle: snapshot.cycle,
        snapshot_at: snapshot.timestamp,
        last_success,
        seconds_since_last_success: last_success
            .map(|at| (Utc::now() - at).num_seconds().max(0)),
        viewers: state.health.viewers(),
        fair_value_available: state.health.fair_value_available(),
        cache_enabled: state.health.cache_enabled(),
        cache_write_failures: state.health.cache_write_failures(),
        last_cycle: state.health.last_cycle(),
        books,
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencySummary> {
    Json(state.latency.summary())
}
