use std::sync::Arc;

use uuid::Uuid;

use crate::config::TrackingSettings;
use crate::engine::inflight::InFlight;
use crate::engine::tracker::DeliveryTracker;
use crate::observability::metrics::Metrics;
use crate::providers::{Geocoder, PostalLookup, Providers};
use crate::store::OrderBook;

pub struct AppState {
    pub orders: Arc<OrderBook>,
    pub tracker: Arc<DeliveryTracker>,
    pub geocoder: Arc<dyn Geocoder>,
    pub postal: Arc<dyn PostalLookup>,
    pub geocodes_in_flight: InFlight<Uuid>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(tracking: TrackingSettings, event_buffer_size: usize, providers: Providers) -> Self {
        let orders = Arc::new(OrderBook::new(event_buffer_size));
        let metrics = Metrics::new();
        let geocodes_in_flight = InFlight::new();

        let tracker = DeliveryTracker::new(
            orders.clone(),
            providers.geocoder.clone(),
            providers.router.clone(),
            tracking,
            metrics.clone(),
            geocodes_in_flight.clone(),
        );

        Self {
            orders,
            tracker,
            geocoder: providers.geocoder,
            postal: providers.postal,
            geocodes_in_flight,
            metrics,
        }
    }
}
