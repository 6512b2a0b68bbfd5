use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::{Coordinate, LocationFix};
use crate::models::order::{Order, OrderStatus};

/// GeoJSON LineString, coordinates in `[lng, lat]` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub distance_km: f64,
    pub duration_min: u32,
    pub geometry: RouteGeometry,
}

/// Live navigation data embedded in an order while it is out for delivery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryInfo {
    pub distance_km: Option<f64>,
    pub duration_min: Option<u32>,
    pub speed_kmh: f64,
    pub courier_position: Option<Coordinate>,
    pub geometry: Option<RouteGeometry>,
    pub started_at: Option<DateTime<Utc>>,
    pub route_updated_at: Option<DateTime<Utc>>,
}

impl DeliveryInfo {
    pub fn apply_route(&mut self, route: &Route) {
        self.distance_km = Some(route.distance_km);
        self.duration_min = Some(route.duration_min);
        self.geometry = Some(route.geometry.clone());
        self.route_updated_at = Some(Utc::now());
    }

    pub fn clear_route(&mut self) {
        self.distance_km = None;
        self.duration_min = None;
        self.geometry = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingPhase {
    Idle,
    Navigating,
    ArrivalPending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveDelivery {
    pub order_id: Uuid,
    pub destination: Coordinate,
    pub order: Order,
    /// Status the order held before navigation began; restored on cancel.
    pub previous_status: OrderStatus,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackingSnapshot {
    pub phase: TrackingPhase,
    pub active: Option<ActiveDelivery>,
    pub last_fix: Option<LocationFix>,
    pub speed_kmh: f64,
}

/// Messages fanned out to every subscriber of the order book.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackingEvent {
    OrderUpdated {
        order: Order,
    },
    OrdersCleared {
        removed: usize,
    },
    LocationUpdated {
        fix: LocationFix,
        speed_kmh: f64,
    },
    ArrivalPending {
        order_id: Uuid,
        distance_m: f64,
    },
    DeliveryStarted {
        order_id: Uuid,
    },
    DeliveryFinished {
        order_id: Uuid,
    },
    DeliveryCancelled {
        order_id: Uuid,
    },
}
