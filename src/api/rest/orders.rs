use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, patch, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::nearest::{scan_candidates, NearestScan};
use crate::error::AppError;
use crate::models::order::{NewOrder, Order, OrderStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", get(list_orders).post(create_order))
        .route("/orders/delivered", delete(clear_delivered))
        .route("/orders/nearest", post(nearest_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", patch(update_order_status))
}

#[derive(Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<OrderStatus>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Default, Deserialize)]
pub struct NearestRequest {
    /// Restrict the scan to these orders; defaults to every order ready to go.
    #[serde(default)]
    pub order_ids: Option<Vec<Uuid>>,
}

#[derive(Serialize)]
pub struct ClearedResponse {
    pub removed: usize,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewOrder>,
) -> Result<Json<Order>, AppError> {
    if payload.customer_name.trim().is_empty() {
        return Err(AppError::BadRequest("customer name cannot be empty".to_string()));
    }

    if payload.address.trim().is_empty() {
        return Err(AppError::BadRequest("address cannot be empty".to_string()));
    }

    let order = state.orders.insert(Order::from_intake(payload));
    tracing::info!(order_id = %order.id, customer = %order.customer_name, "order received");

    Ok(Json(order))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListOrdersQuery>,
) -> Json<Vec<Order>> {
    Json(state.orders.list(query.status))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.orders.get(&id)?))
}

async fn update_order_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Order>, AppError> {
    if state.tracker.active_order_id().await == Some(id) {
        return Err(AppError::InvalidState(format!(
            "order {id} is being delivered; finish or cancel the delivery"
        )));
    }

    if payload.status == OrderStatus::OutForDelivery {
        return Err(AppError::InvalidState(
            "orders go out for delivery by starting navigation".to_string(),
        ));
    }

    let order = state.orders.set_status(&id, payload.status)?;
    tracing::info!(order_id = %id, status = ?order.status, "order status changed");

    Ok(Json(order))
}

async fn clear_delivered(State(state): State<Arc<AppState>>) -> Json<ClearedResponse> {
    let removed = state.orders.clear_finished();
    tracing::info!(removed, "cleared delivered orders");
    Json(ClearedResponse { removed })
}

async fn nearest_order(
    State(state): State<Arc<AppState>>,
    payload: Option<Json<NearestRequest>>,
) -> Result<Json<NearestScan>, AppError> {
    let courier = state
        .tracker
        .last_position()
        .await
        .ok_or_else(|| AppError::InvalidState("courier location unavailable".to_string()))?;

    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let candidates: Vec<Order> = match request.order_ids {
        Some(ids) => ids
            .iter()
            .map(|id| state.orders.get(id))
            .collect::<Result<_, _>>()?,
        None => state
            .orders
            .list(None)
            .into_iter()
            .filter(|order| {
                matches!(order.status, OrderStatus::Ready | OrderStatus::ReadyForPickup)
            })
            .collect(),
    };

    let scan = scan_candidates(
        courier,
        &candidates,
        state.geocoder.as_ref(),
        &state.geocodes_in_flight,
        &state.metrics,
    )
    .await;

    for (order_id, position) in &scan.resolved {
        if let Err(err) = state.orders.set_coordinates(order_id, *position) {
            tracing::warn!(order_id = %order_id, error = %err, "order vanished before coordinates were stored");
        }
    }

    tracing::info!(
        candidates = candidates.len(),
        unresolved = scan.unresolved.len(),
        closest = ?scan.closest.as_ref().map(|closest| closest.order_id),
        "nearest order scan finished"
    );

    Ok(Json(scan))
}
