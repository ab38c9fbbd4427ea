//! HTTP request handlers.

use super::AppState;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::Utc;
use serde::Deserialize;

// ============================================================================
// API: Status
// ============================================================================

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    let view = state.registry.current();
    let now = Utc::now().timestamp_millis();

    let incidents = state.store.ongoing_incidents().unwrap_or_else(|e| {
        tracing::warn!("Failed to load incidents for status view: {}", e);
        Vec::new()
    });

    match state.aggregator.status_view(&view, &incidents, now) {
        Ok(status) => Json(status).into_response(),
        Err(e) => {
            tracing::error!("Error building status view: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

// ============================================================================
// API: Samples
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SamplesQuery {
    #[serde(default)]
    pub url: Option<String>,
    /// Milliseconds since the epoch. Defaults to the retention horizon.
    #[serde(default)]
    pub since: Option<i64>,
}

pub async fn handle_samples(
    State(state): State<AppState>,
    Query(query): Query<SamplesQuery>,
) -> impl IntoResponse {
    let since = query.since.unwrap_or_else(|| retention_horizon(&state));

    match state.store.query_range(query.url.as_deref(), since) {
        Ok(samples) => Json(samples).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    #[serde(default)]
    pub since: Option<i64>,
}

/// Newest sample per URL within the retention window.
pub async fn handle_latest_samples(
    State(state): State<AppState>,
    Query(query): Query<LatestQuery>,
) -> impl IntoResponse {
    let since = query.since.unwrap_or_else(|| retention_horizon(&state));

    match state.store.latest_samples(since) {
        Ok(samples) => Json(samples).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn retention_horizon(state: &AppState) -> i64 {
    let retention = state.registry.current().snapshot().retention();
    Utc::now().timestamp_millis() - retention.as_millis() as i64
}

// ============================================================================
// API: Incidents
// ============================================================================

pub async fn handle_incidents(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_incidents() {
        Ok(incidents) => Json(incidents).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
