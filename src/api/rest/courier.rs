use std::sync::Arc;

use axum::extract::State;
use axum::routing::put;
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::geo::{Coordinate, LocationFix};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/courier/location", put(record_location).get(get_location))
}

#[derive(Deserialize)]
pub struct LocationRequest {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub reported_speed: Option<f64>,
}

#[derive(Serialize)]
pub struct LocationResponse {
    pub fix: LocationFix,
    pub speed_kmh: f64,
}

async fn record_location(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LocationRequest>,
) -> Result<Json<LocationResponse>, AppError> {
    let fix = LocationFix {
        position: Coordinate::new(payload.lat, payload.lng),
        timestamp: payload.timestamp.unwrap_or_else(Utc::now),
        heading: payload.heading,
        reported_speed: payload.reported_speed,
    };

    let speed_kmh = state.tracker.record_fix(fix.clone()).await?;
    Ok(Json(LocationResponse { fix, speed_kmh }))
}

async fn get_location(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LocationResponse>, AppError> {
    let snapshot = state.tracker.snapshot().await;
    let fix = snapshot
        .last_fix
        .ok_or_else(|| AppError::NotFound("no courier location yet".to_string()))?;

    Ok(Json(LocationResponse {
        fix,
        speed_kmh: snapshot.speed_kmh,
    }))
}
