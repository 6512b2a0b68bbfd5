use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::Coordinate;
use crate::models::delivery::{DeliveryInfo, TrackingEvent};
use crate::models::order::{Order, OrderStatus};

/// Keyed order collection with a fan-out channel for every change.
///
/// All writes touch a single field (or the delivery sub-record) under the
/// entry lock, so concurrent writers of different fields never clobber each
/// other.
pub struct OrderBook {
    orders: DashMap<Uuid, Order>,
    events_tx: broadcast::Sender<TrackingEvent>,
}

impl OrderBook {
    pub fn new(event_buffer_size: usize) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size);
        Self {
            orders: DashMap::new(),
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.events_tx.subscribe()
    }

    pub fn publish(&self, event: TrackingEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn insert(&self, order: Order) -> Order {
        self.orders.insert(order.id, order.clone());
        self.publish(TrackingEvent::OrderUpdated {
            order: order.clone(),
        });
        order
    }

    pub fn get(&self, id: &Uuid) -> Result<Order, AppError> {
        self.orders
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))
    }

    /// Orders sorted by creation time, optionally filtered by status.
    pub fn list(&self, status: Option<OrderStatus>) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| status.is_none_or(|wanted| entry.status == wanted))
            .map(|entry| entry.value().clone())
            .collect();
        orders.sort_by_key(|order| order.created_at);
        orders
    }

    pub fn set_status(&self, id: &Uuid, status: OrderStatus) -> Result<Order, AppError> {
        self.modify(id, |order| order.status = status)
    }

    pub fn set_coordinates(&self, id: &Uuid, coordinates: Coordinate) -> Result<Order, AppError> {
        self.modify(id, |order| order.coordinates = Some(coordinates))
    }

    /// Mutates the delivery sub-record, creating it if absent.
    pub fn update_delivery<F>(&self, id: &Uuid, update: F) -> Result<Order, AppError>
    where
        F: FnOnce(&mut DeliveryInfo),
    {
        self.modify(id, |order| update(order.delivery.get_or_insert_with(DeliveryInfo::default)))
    }

    pub fn clear_delivery(&self, id: &Uuid) -> Result<Order, AppError> {
        self.modify(id, |order| order.delivery = None)
    }

    /// Removes every delivered or done order. Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let before = self.orders.len();
        self.orders.retain(|_, order| !order.status.is_finished());
        let removed = before.saturating_sub(self.orders.len());

        if removed > 0 {
            self.publish(TrackingEvent::OrdersCleared { removed });
        }
        removed
    }

    fn modify<F>(&self, id: &Uuid, apply: F) -> Result<Order, AppError>
    where
        F: FnOnce(&mut Order),
    {
        let updated = {
            let mut entry = self
                .orders
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;
            apply(&mut entry);
            entry.updated_at = Utc::now();
            entry.clone()
        };

        self.publish(TrackingEvent::OrderUpdated {
            order: updated.clone(),
        });
        Ok(updated)
    }
}
