use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::providers::ProviderError;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub location_fixes_total: IntCounter,
    pub route_refresh_total: IntCounterVec,
    pub route_latency_seconds: HistogramVec,
    pub geocode_requests_total: IntCounterVec,
    pub active_deliveries: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let location_fixes_total =
            IntCounter::new("location_fixes_total", "Courier location fixes received")
                .expect("valid location_fixes_total metric");

        let route_refresh_total = IntCounterVec::new(
            Opts::new("route_refresh_total", "Route refreshes by outcome"),
            &["outcome"],
        )
        .expect("valid route_refresh_total metric");

        let route_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "route_latency_seconds",
                "Latency of routing service calls in seconds",
            ),
            &["outcome"],
        )
        .expect("valid route_latency_seconds metric");

        let geocode_requests_total = IntCounterVec::new(
            Opts::new("geocode_requests_total", "Address lookups by outcome"),
            &["outcome"],
        )
        .expect("valid geocode_requests_total metric");

        let active_deliveries =
            IntGauge::new("active_deliveries", "Deliveries currently being navigated")
                .expect("valid active_deliveries metric");

        registry
            .register(Box::new(location_fixes_total.clone()))
            .expect("register location_fixes_total");
        registry
            .register(Box::new(route_refresh_total.clone()))
            .expect("register route_refresh_total");
        registry
            .register(Box::new(route_latency_seconds.clone()))
            .expect("register route_latency_seconds");
        registry
            .register(Box::new(geocode_requests_total.clone()))
            .expect("register geocode_requests_total");
        registry
            .register(Box::new(active_deliveries.clone()))
            .expect("register active_deliveries");

        Self {
            registry,
            location_fixes_total,
            route_refresh_total,
            route_latency_seconds,
            geocode_requests_total,
            active_deliveries,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

pub fn outcome<T>(result: &Result<T, ProviderError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(ProviderError::NotFound(_)) => "not_found",
        Err(ProviderError::NoRoute) => "no_route",
        Err(ProviderError::Transient(_)) => "transient",
    }
}
