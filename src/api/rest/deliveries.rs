use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::delivery::{ActiveDelivery, TrackingSnapshot};
use crate::models::order::Order;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/delivery", get(current_delivery).post(start_delivery))
        .route("/delivery/confirm", post(confirm_delivery))
        .route("/delivery/decline", post(decline_arrival))
        .route("/delivery/cancel", post(cancel_delivery))
}

#[derive(Deserialize)]
pub struct StartDeliveryRequest {
    pub order_id: Uuid,
}

async fn current_delivery(State(state): State<Arc<AppState>>) -> Json<TrackingSnapshot> {
    Json(state.tracker.snapshot().await)
}

async fn start_delivery(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<StartDeliveryRequest>,
) -> Result<Json<ActiveDelivery>, AppError> {
    let active = state.tracker.start_delivery(payload.order_id).await?;
    Ok(Json(active))
}

async fn confirm_delivery(State(state): State<Arc<AppState>>) -> Result<Json<Order>, AppError> {
    Ok(Json(state.tracker.confirm_delivery().await?))
}

async fn decline_arrival(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TrackingSnapshot>, AppError> {
    state.tracker.decline_arrival().await?;
    Ok(Json(state.tracker.snapshot().await))
}

async fn cancel_delivery(State(state): State<Arc<AppState>>) -> Result<Json<Order>, AppError> {
    Ok(Json(state.tracker.cancel_delivery().await?))
}
