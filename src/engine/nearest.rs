use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::inflight::InFlight;
use crate::geo::{haversine_km, Coordinate};
use crate::models::order::Order;
use crate::observability::metrics::{outcome, Metrics};
use crate::providers::address::extract_postal_code;
use crate::providers::{Geocoder, ProviderError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosestOrder {
    pub order_id: Uuid,
    pub distance_km: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NearestScan {
    pub closest: Option<ClosestOrder>,
    /// Candidates geocoded during this scan.
    pub resolved: Vec<(Uuid, Coordinate)>,
    /// Candidates whose address could not be resolved.
    pub unresolved: Vec<Uuid>,
    /// Candidates skipped because a lookup for them was already running.
    pub in_flight: Vec<Uuid>,
}

enum Resolution {
    Known(Coordinate),
    Geocoded(Coordinate),
    Failed(ProviderError),
    Busy,
}

/// Geocodes the full address, then retries once with the order's postal code,
/// or one found in the address text.
pub async fn resolve_address(
    geocoder: &dyn Geocoder,
    address: &str,
    postal_code: Option<&str>,
    metrics: &Metrics,
) -> Result<Coordinate, ProviderError> {
    let err = match counted(geocoder, address, metrics).await {
        Ok(coordinate) => return Ok(coordinate),
        Err(err) => err,
    };

    let fallback = postal_code
        .and_then(extract_postal_code)
        .or_else(|| extract_postal_code(address));

    match fallback {
        Some(postal_code) => {
            debug!(postal_code = %postal_code, error = %err, "retrying geocode with postal code");
            counted(geocoder, &postal_code, metrics).await
        }
        None => Err(err),
    }
}

async fn counted(
    geocoder: &dyn Geocoder,
    query: &str,
    metrics: &Metrics,
) -> Result<Coordinate, ProviderError> {
    let result = geocoder.geocode(query).await;
    metrics
        .geocode_requests_total
        .with_label_values(&[outcome(&result)])
        .inc();
    result
}

/// Resolves every candidate and picks the one closest to `courier`.
///
/// Candidates that fail to resolve are reported and skipped. Ties go to the
/// candidate listed first.
pub async fn scan_candidates(
    courier: Coordinate,
    candidates: &[Order],
    geocoder: &dyn Geocoder,
    inflight: &InFlight<Uuid>,
    metrics: &Metrics,
) -> NearestScan {
    let lookups = candidates.iter().map(|order| async move {
        if let Some(known) = order.coordinates {
            return Resolution::Known(known);
        }

        let Some(_guard) = inflight.try_acquire(order.id) else {
            return Resolution::Busy;
        };

        match resolve_address(
            geocoder,
            &order.address,
            order.postal_code.as_deref(),
            metrics,
        )
        .await
        {
            Ok(coordinate) => Resolution::Geocoded(coordinate),
            Err(err) => Resolution::Failed(err),
        }
    });

    let resolutions = join_all(lookups).await;

    let mut scan = NearestScan::default();
    for (order, resolution) in candidates.iter().zip(resolutions) {
        let position = match resolution {
            Resolution::Known(position) => position,
            Resolution::Geocoded(position) => {
                scan.resolved.push((order.id, position));
                position
            }
            Resolution::Failed(err) => {
                warn!(order_id = %order.id, error = %err, "address invalid; skipping candidate");
                scan.unresolved.push(order.id);
                continue;
            }
            Resolution::Busy => {
                debug!(order_id = %order.id, "geocode already in flight; skipping candidate");
                scan.in_flight.push(order.id);
                continue;
            }
        };

        let distance_km = haversine_km(&courier, &position);
        let closer = scan
            .closest
            .as_ref()
            .is_none_or(|best| distance_km < best.distance_km);

        if closer {
            scan.closest = Some(ClosestOrder {
                order_id: order.id,
                distance_km,
            });
        }
    }

    scan
}

pub async fn find_closest(
    courier: Coordinate,
    candidates: &[Order],
    geocoder: &dyn Geocoder,
    inflight: &InFlight<Uuid>,
    metrics: &Metrics,
) -> Option<ClosestOrder> {
    scan_candidates(courier, candidates, geocoder, inflight, metrics)
        .await
        .closest
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::{find_closest, resolve_address, scan_candidates};
    use crate::engine::inflight::InFlight;
    use crate::geo::Coordinate;
    use crate::models::order::{NewOrder, Order};
    use crate::observability::metrics::Metrics;
    use crate::providers::{Geocoder, ProviderError};

    struct TableGeocoder {
        known: HashMap<&'static str, Coordinate>,
        queries: Mutex<Vec<String>>,
    }

    impl TableGeocoder {
        fn new(known: &[(&'static str, Coordinate)]) -> Self {
            Self {
                known: known.iter().copied().collect(),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Geocoder for TableGeocoder {
        async fn geocode(&self, address: &str) -> Result<Coordinate, ProviderError> {
            self.queries.lock().unwrap().push(address.to_string());
            if address.contains("offline") {
                return Err(ProviderError::Transient("connection reset".to_string()));
            }
            self.known
                .get(address)
                .copied()
                .ok_or_else(|| ProviderError::NotFound(address.to_string()))
        }
    }

    fn order(address: &str) -> Order {
        Order::from_intake(NewOrder {
            customer_name: "Cliente".to_string(),
            address: address.to_string(),
            ..Default::default()
        })
    }

    const COURIER: Coordinate = Coordinate {
        lat: -23.5505,
        lng: -46.6333,
    };

    #[tokio::test]
    async fn single_resolvable_candidate_wins_wherever_it_is() {
        let geocoder = TableGeocoder::new(&[("Rua Boa, 1", Coordinate::new(-23.60, -46.70))]);
        let candidates = vec![order("Rua Nenhuma, 9"), order("offline street"), order("Rua Boa, 1")];

        let closest = find_closest(COURIER, &candidates, &geocoder, &InFlight::new(), &Metrics::new())
            .await
            .unwrap();

        assert_eq!(closest.order_id, candidates[2].id);
    }

    #[tokio::test]
    async fn picks_minimum_distance_and_reports_failures() {
        let geocoder = TableGeocoder::new(&[
            ("far", Coordinate::new(-23.70, -46.80)),
            ("near", Coordinate::new(-23.551, -46.634)),
        ]);
        let candidates = vec![order("far"), order("bad"), order("near")];

        let scan = scan_candidates(COURIER, &candidates, &geocoder, &InFlight::new(), &Metrics::new()).await;

        assert_eq!(scan.closest.unwrap().order_id, candidates[2].id);
        assert_eq!(scan.unresolved, vec![candidates[1].id]);
        assert_eq!(scan.resolved.len(), 2);
    }

    #[tokio::test]
    async fn ties_go_to_first_candidate() {
        let geocoder = TableGeocoder::new(&[("same", Coordinate::new(-23.56, -46.64))]);
        let candidates = vec![order("same"), order("same")];

        let closest = find_closest(COURIER, &candidates, &geocoder, &InFlight::new(), &Metrics::new())
            .await
            .unwrap();

        assert_eq!(closest.order_id, candidates[0].id);
    }

    #[tokio::test]
    async fn known_coordinates_skip_geocoding() {
        let geocoder = TableGeocoder::new(&[]);
        let mut located = order("anything");
        located.coordinates = Some(Coordinate::new(-23.551, -46.634));

        let scan = scan_candidates(COURIER, &[located.clone()], &geocoder, &InFlight::new(), &Metrics::new()).await;

        assert_eq!(scan.closest.unwrap().order_id, located.id);
        assert!(scan.resolved.is_empty());
        assert!(geocoder.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn nothing_resolves_yields_none() {
        let geocoder = TableGeocoder::new(&[]);
        let candidates = vec![order("bad"), order("worse")];

        assert!(
            find_closest(COURIER, &candidates, &geocoder, &InFlight::new(), &Metrics::new())
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn candidate_already_in_flight_is_skipped() {
        let geocoder = TableGeocoder::new(&[("near", Coordinate::new(-23.551, -46.634))]);
        let candidates = vec![order("near")];
        let inflight = InFlight::new();
        let _held = inflight.try_acquire(candidates[0].id).unwrap();

        let scan = scan_candidates(COURIER, &candidates, &geocoder, &inflight, &Metrics::new()).await;

        assert!(scan.closest.is_none());
        assert_eq!(scan.in_flight, vec![candidates[0].id]);
        assert!(geocoder.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_postal_code() {
        let geocoder = TableGeocoder::new(&[("01310-100", Coordinate::new(-23.56, -46.65))]);

        let coordinate = resolve_address(&geocoder, "Av Paulista s/n, CEP 01310100", None, &Metrics::new())
            .await
            .unwrap();

        assert_eq!(coordinate, Coordinate::new(-23.56, -46.65));
        assert_eq!(
            *geocoder.queries.lock().unwrap(),
            vec!["Av Paulista s/n, CEP 01310100", "01310-100"]
        );
    }

    #[tokio::test]
    async fn no_postal_code_means_no_retry() {
        let geocoder = TableGeocoder::new(&[]);

        let result = resolve_address(&geocoder, "Rua Sem Numero", None, &Metrics::new()).await;

        assert!(matches!(result, Err(ProviderError::NotFound(_))));
        assert_eq!(geocoder.queries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_the_order_postal_code() {
        let geocoder = TableGeocoder::new(&[("01305-000", Coordinate::new(-23.553, -46.652))]);
        let mut parsed = order("Rua Augusta, 100 - Consolação");
        parsed.postal_code = Some("01305-000".to_string());
        let metrics = Metrics::new();

        let scan = scan_candidates(
            COURIER,
            &[parsed.clone()],
            &geocoder,
            &InFlight::new(),
            &metrics,
        )
        .await;

        assert_eq!(scan.closest.unwrap().order_id, parsed.id);
        assert_eq!(scan.resolved, vec![(parsed.id, Coordinate::new(-23.553, -46.652))]);
        assert_eq!(
            *geocoder.queries.lock().unwrap(),
            vec!["Rua Augusta, 100 - Consolação", "01305-000"]
        );
        let geocodes = &metrics.geocode_requests_total;
        assert_eq!(geocodes.with_label_values(&["not_found"]).get(), 1);
        assert_eq!(geocodes.with_label_values(&["ok"]).get(), 1);
    }

    #[tokio::test]
    async fn failed_lookups_are_counted_by_outcome() {
        let geocoder = TableGeocoder::new(&[]);
        let metrics = Metrics::new();

        let result = resolve_address(&geocoder, "offline street", None, &metrics).await;

        assert!(matches!(result, Err(ProviderError::Transient(_))));
        let geocodes = &metrics.geocode_requests_total;
        assert_eq!(geocodes.with_label_values(&["transient"]).get(), 1);
        assert_eq!(geocodes.with_label_values(&["failed"]).get(), 0);
    }
}
