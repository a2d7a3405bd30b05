use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;

use crate::console::ConsoleStatus;
use crate::error::AppError;
use crate::models::marker::MapView;
use crate::models::snapshot::{DerivedStats, Snapshot};
use crate::state::AppState;
use crate::sync::store::RefreshOutcome;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/dispatch/stats", get(stats))
        .route("/dispatch/map", get(map_view))
        .route("/dispatch/snapshot", get(snapshot))
        .route("/dispatch/status", get(status))
        .route("/dispatch/refresh", post(refresh))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<DerivedStats> {
    Json(state.console.stats())
}

async fn map_view(State(state): State<Arc<AppState>>) -> Json<MapView> {
    Json(state.console.map_view())
}

async fn snapshot(State(state): State<Arc<AppState>>) -> Json<Snapshot> {
    Json(state.console.snapshot().as_ref().clone())
}

async fn status(State(state): State<Arc<AppState>>) -> Json<ConsoleStatus> {
    Json(state.console.status(Utc::now()))
}

async fn refresh(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RefreshOutcome>, AppError> {
    let outcome = state.console.refresh().await?;
    Ok(Json(outcome))
}
