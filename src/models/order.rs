use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Coordinate;
use crate::models::delivery::DeliveryInfo;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Ready,
    ReadyForPickup,
    OutForDelivery,
    Delivered,
    Done,
}

impl OrderStatus {
    /// Finished orders are the ones removed by a bulk clear.
    pub fn is_finished(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Done)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub customer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub status: OrderStatus,
    pub coordinates: Option<Coordinate>,
    pub delivery: Option<DeliveryInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewOrder {
    pub customer_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub address: String,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub items: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Order {
    pub fn from_intake(new: NewOrder) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            customer_name: new.customer_name.trim().to_string(),
            phone: new.phone,
            address: new.address.trim().to_string(),
            postal_code: new.postal_code,
            items: new.items,
            notes: new.notes,
            status: OrderStatus::Pending,
            coordinates: None,
            delivery: None,
            created_at: now,
            updated_at: now,
        }
    }
}
