use std::sync::{Arc, Mutex as SyncMutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TrackingSettings;
use crate::engine::inflight::InFlight;
use crate::error::AppError;
use crate::geo::{haversine_km, speed_kmh, Coordinate, LocationFix};
use crate::models::delivery::{
    ActiveDelivery, DeliveryInfo, TrackingEvent, TrackingPhase, TrackingSnapshot,
};
use crate::models::order::{Order, OrderStatus};
use crate::observability::metrics::{outcome, Metrics};
use crate::providers::{Geocoder, RouteProvider};
use crate::store::OrderBook;

struct TrackerState {
    phase: TrackingPhase,
    active: Option<ActiveDelivery>,
    last_fix: Option<LocationFix>,
    speed_kmh: f64,
    /// Bumped on every start and exit; refresh work from an older epoch is
    /// discarded.
    epoch: u64,
    refresh_task: Option<JoinHandle<()>>,
}

impl TrackerState {
    fn stop_refresh(&mut self) {
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
    }

    fn leave_navigation(&mut self) -> Option<ActiveDelivery> {
        self.stop_refresh();
        self.epoch += 1;
        self.phase = TrackingPhase::Idle;
        self.active.take()
    }
}

/// Follows the courier's single active delivery.
///
/// Location fixes update speed and position immediately; the route, ETA and
/// arrival check are refreshed on a fixed cadence by a background task that
/// is aborted on every exit from navigation.
pub struct DeliveryTracker {
    orders: Arc<OrderBook>,
    geocoder: Arc<dyn Geocoder>,
    router: Arc<dyn RouteProvider>,
    settings: TrackingSettings,
    metrics: Metrics,
    /// Shared with the nearest-order scan so one order is never geocoded twice
    /// at once.
    geocodes_in_flight: InFlight<Uuid>,
    state: Mutex<TrackerState>,
    /// Order whose start is waiting on the geocoder.
    starting: SyncMutex<Option<Uuid>>,
}

/// Clears the pending start when dropped, including when the caller gives up
/// on `start_delivery` mid-flight.
struct StartLatch<'a> {
    slot: &'a SyncMutex<Option<Uuid>>,
}

impl Drop for StartLatch<'_> {
    fn drop(&mut self) {
        *lock_slot(self.slot) = None;
    }
}

fn lock_slot(slot: &SyncMutex<Option<Uuid>>) -> MutexGuard<'_, Option<Uuid>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DeliveryTracker {
    pub fn new(
        orders: Arc<OrderBook>,
        geocoder: Arc<dyn Geocoder>,
        router: Arc<dyn RouteProvider>,
        settings: TrackingSettings,
        metrics: Metrics,
        geocodes_in_flight: InFlight<Uuid>,
    ) -> Arc<Self> {
        Arc::new(Self {
            orders,
            geocoder,
            router,
            settings,
            metrics,
            geocodes_in_flight,
            state: Mutex::new(TrackerState {
                phase: TrackingPhase::Idle,
                active: None,
                last_fix: None,
                speed_kmh: 0.0,
                epoch: 0,
                refresh_task: None,
            }),
            starting: SyncMutex::new(None),
        })
    }

    pub async fn snapshot(&self) -> TrackingSnapshot {
        let state = self.state.lock().await;
        let active = state.active.clone().map(|mut active| {
            if let Ok(current) = self.orders.get(&active.order_id) {
                active.order = current;
            }
            active
        });

        TrackingSnapshot {
            phase: state.phase,
            active,
            last_fix: state.last_fix.clone(),
            speed_kmh: state.speed_kmh,
        }
    }

    pub async fn phase(&self) -> TrackingPhase {
        self.state.lock().await.phase
    }

    pub async fn active_order_id(&self) -> Option<Uuid> {
        let state = self.state.lock().await;
        state
            .active
            .as_ref()
            .map(|active| active.order_id)
            .or(*lock_slot(&self.starting))
    }

    pub async fn last_position(&self) -> Option<Coordinate> {
        self.state
            .lock()
            .await
            .last_fix
            .as_ref()
            .map(|fix| fix.position)
    }

    /// Records a new courier fix and returns the speed derived from the
    /// previous one. A fix older than the latest one is dropped and reports 0.
    pub async fn record_fix(&self, fix: LocationFix) -> Result<f64, AppError> {
        if !fix.position.is_valid() {
            return Err(AppError::BadRequest(format!(
                "invalid coordinate {}, {}",
                fix.position.lat, fix.position.lng
            )));
        }

        let mut state = self.state.lock().await;
        if let Some(last) = &state.last_fix {
            if fix.timestamp < last.timestamp {
                debug!(
                    received = %fix.timestamp,
                    latest = %last.timestamp,
                    "ignoring location fix older than the latest one"
                );
                return Ok(0.0);
            }
        }

        let speed = speed_kmh(state.last_fix.as_ref(), Some(&fix));
        state.last_fix = Some(fix.clone());
        state.speed_kmh = speed;
        self.metrics.location_fixes_total.inc();

        if let Some(active) = &state.active {
            let position = fix.position;
            if let Err(err) = self.orders.update_delivery(&active.order_id, |info| {
                info.speed_kmh = speed;
                info.courier_position = Some(position);
            }) {
                warn!(order_id = %active.order_id, error = %err, "failed to publish courier position");
            }
        }

        self.orders.publish(TrackingEvent::LocationUpdated {
            fix,
            speed_kmh: speed,
        });

        Ok(speed)
    }

    /// Starts navigating to `order_id`. Requires a known courier location and
    /// no other delivery in progress.
    pub async fn start_delivery(self: &Arc<Self>, order_id: Uuid) -> Result<ActiveDelivery, AppError> {
        let latch = {
            let state = self.state.lock().await;
            if state.last_fix.is_none() {
                return Err(AppError::InvalidState(
                    "courier location unavailable".to_string(),
                ));
            }
            if let Some(active) = &state.active {
                if active.order_id == order_id {
                    return Ok(active.clone());
                }
                return Err(AppError::InvalidState(
                    "finish the current delivery first".to_string(),
                ));
            }

            let mut starting = lock_slot(&self.starting);
            if let Some(pending) = *starting {
                return Err(AppError::InvalidState(if pending == order_id {
                    "delivery start already in progress".to_string()
                } else {
                    "finish the current delivery first".to_string()
                }));
            }
            *starting = Some(order_id);
            StartLatch {
                slot: &self.starting,
            }
        };

        let (order, destination) = self.locate_destination(order_id).await?;

        let mut state = self.state.lock().await;
        let courier_position = state.last_fix.as_ref().map(|fix| fix.position);
        let speed = state.speed_kmh;
        let started_at = Utc::now();

        self.orders.set_coordinates(&order_id, destination)?;
        self.orders.set_status(&order_id, OrderStatus::OutForDelivery)?;
        let snapshot = self.orders.update_delivery(&order_id, |info| {
            *info = DeliveryInfo {
                speed_kmh: speed,
                courier_position,
                started_at: Some(started_at),
                ..DeliveryInfo::default()
            };
        })?;

        let mut active = ActiveDelivery {
            order_id,
            destination,
            order: snapshot,
            previous_status: order.status,
            started_at,
        };

        state.epoch += 1;
        let epoch = state.epoch;
        state.active = Some(active.clone());
        state.phase = TrackingPhase::Navigating;
        state.refresh_task = Some(self.spawn_refresh_loop(epoch));
        drop(latch);
        drop(state);

        self.metrics.active_deliveries.set(1);
        self.orders
            .publish(TrackingEvent::DeliveryStarted { order_id });
        info!(order_id = %order_id, lat = destination.lat, lng = destination.lng, "delivery started");

        self.refresh_route(epoch).await;

        if let Ok(current) = self.orders.get(&order_id) {
            active.order = current;
        }
        Ok(active)
    }

    /// Marks the active delivery as delivered and returns to idle.
    pub async fn confirm_delivery(&self) -> Result<Order, AppError> {
        let mut state = self.state.lock().await;
        if state.phase == TrackingPhase::Idle {
            return Err(AppError::InvalidState("no delivery in progress".to_string()));
        }

        let active = state
            .leave_navigation()
            .ok_or_else(|| AppError::Internal("navigating without an active delivery".to_string()))?;
        drop(state);

        self.metrics.active_deliveries.set(0);
        self.orders.set_status(&active.order_id, OrderStatus::Delivered)?;
        let order = self.orders.clear_delivery(&active.order_id)?;
        self.orders.publish(TrackingEvent::DeliveryFinished {
            order_id: active.order_id,
        });
        info!(order_id = %active.order_id, "delivery confirmed");

        Ok(order)
    }

    /// Rejects the arrival prompt; navigation continues and the threshold
    /// check is armed again.
    pub async fn decline_arrival(&self) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        if state.phase != TrackingPhase::ArrivalPending {
            return Err(AppError::InvalidState("no arrival awaiting confirmation".to_string()));
        }

        state.phase = TrackingPhase::Navigating;
        debug!("arrival declined; navigation continues");
        Ok(())
    }

    /// Abandons the active delivery and restores the order's previous status.
    pub async fn cancel_delivery(&self) -> Result<Order, AppError> {
        let mut state = self.state.lock().await;
        let active = state
            .leave_navigation()
            .ok_or_else(|| AppError::InvalidState("no delivery in progress".to_string()))?;
        drop(state);

        self.metrics.active_deliveries.set(0);
        self.orders
            .set_status(&active.order_id, active.previous_status)?;
        let order = self.orders.clear_delivery(&active.order_id)?;
        self.orders.publish(TrackingEvent::DeliveryCancelled {
            order_id: active.order_id,
        });
        info!(order_id = %active.order_id, "delivery cancelled");

        Ok(order)
    }

    /// Stops the refresh task without touching the delivery record.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.stop_refresh();
        state.epoch += 1;
    }

    async fn locate_destination(&self, order_id: Uuid) -> Result<(Order, Coordinate), AppError> {
        let order = self.orders.get(&order_id)?;
        if order.status.is_finished() {
            return Err(AppError::InvalidState(format!(
                "order {order_id} was already delivered"
            )));
        }

        if let Some(known) = order.coordinates {
            return Ok((order, known));
        }

        let Some(_lookup) = self.geocodes_in_flight.try_acquire(order_id) else {
            return Err(AppError::InvalidState(format!(
                "address of order {order_id} is already being looked up"
            )));
        };

        let result = self.geocoder.geocode(&order.address).await;
        self.metrics
            .geocode_requests_total
            .with_label_values(&[outcome(&result)])
            .inc();

        let destination = result.inspect_err(|err| {
            warn!(order_id = %order_id, error = %err, "could not geocode delivery address");
        })?;

        Ok((order, destination))
    }

    fn spawn_refresh_loop(self: &Arc<Self>, epoch: u64) -> JoinHandle<()> {
        let tracker: Weak<Self> = Arc::downgrade(self);
        let cadence = self.settings.route_refresh;

        tokio::spawn(async move {
            let mut ticker = interval_at(tokio::time::Instant::now() + cadence, cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(tracker) = tracker.upgrade() else {
                    break;
                };
                if !tracker.refresh_route(epoch).await {
                    break;
                }
            }
        })
    }

    /// One refresh tick. Returns `false` once the epoch is stale and the loop
    /// should stop.
    async fn refresh_route(&self, epoch: u64) -> bool {
        let (origin, destination, order_id) = {
            let state = self.state.lock().await;
            if state.epoch != epoch {
                return false;
            }
            let (Some(active), Some(fix)) = (&state.active, &state.last_fix) else {
                return false;
            };
            (fix.position, active.destination, active.order_id)
        };

        let started = Instant::now();
        let result = self.router.route(origin, destination).await;
        let label = outcome(&result);
        self.metrics
            .route_latency_seconds
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());
        self.metrics
            .route_refresh_total
            .with_label_values(&[label])
            .inc();

        let mut state = self.state.lock().await;
        if state.epoch != epoch || state.active.is_none() {
            debug!(order_id = %order_id, "discarding route for a finished delivery");
            return false;
        }

        let written = match &result {
            Ok(route) => self
                .orders
                .update_delivery(&order_id, |info| info.apply_route(route)),
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "route refresh failed; retrying next tick");
                self.orders
                    .update_delivery(&order_id, DeliveryInfo::clear_route)
            }
        };
        if let Err(err) = written {
            warn!(order_id = %order_id, error = %err, "failed to publish route");
        }

        let current = state
            .last_fix
            .as_ref()
            .map(|fix| fix.position)
            .unwrap_or(origin);
        let distance_m = haversine_km(&current, &destination) * 1_000.0;

        if state.phase == TrackingPhase::Navigating && distance_m <= self.settings.arrival_threshold_m
        {
            state.phase = TrackingPhase::ArrivalPending;
            info!(order_id = %order_id, distance_m, "courier arrived; awaiting confirmation");
            self.orders.publish(TrackingEvent::ArrivalPending {
                order_id,
                distance_m,
            });
        }

        true
    }
}
