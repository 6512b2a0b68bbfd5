#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bakery_tracker::geo::Coordinate;
use bakery_tracker::models::delivery::{Route, RouteGeometry};
use bakery_tracker::providers::{
    Geocoder, PostalAddress, PostalLookup, ProviderError, Providers, RouteProvider,
};

pub const BAKERY_STREET: &str = "Rua Augusta, 100";
pub const DESTINATION: Coordinate = Coordinate {
    lat: -23.55,
    lng: -46.65,
};

#[derive(Default)]
pub struct FakeGeocoder {
    known: Mutex<HashMap<String, Coordinate>>,
    calls: AtomicUsize,
}

impl FakeGeocoder {
    pub fn with(entries: &[(&str, Coordinate)]) -> Arc<Self> {
        let geocoder = Self::default();
        {
            let mut known = geocoder.known.lock().unwrap();
            for (address, coordinate) in entries {
                known.insert(address.to_string(), *coordinate);
            }
        }
        Arc::new(geocoder)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn geocode(&self, address: &str) -> Result<Coordinate, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.known
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .ok_or_else(|| ProviderError::NotFound(address.to_string()))
    }
}

pub struct FakeRouter {
    next: Mutex<Result<Route, ProviderError>>,
    calls: AtomicUsize,
}

impl FakeRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next: Mutex::new(Ok(sample_route())),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn respond_with(&self, result: Result<Route, ProviderError>) {
        *self.next.lock().unwrap() = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RouteProvider for FakeRouter {
    async fn route(&self, _start: Coordinate, _end: Coordinate) -> Result<Route, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.next.lock().unwrap().clone()
    }
}

pub struct FakePostal;

#[async_trait]
impl PostalLookup for FakePostal {
    async fn lookup(&self, postal_code: &str) -> Result<PostalAddress, ProviderError> {
        if postal_code.starts_with("01310") {
            Ok(PostalAddress {
                postal_code: "01310-100".to_string(),
                street: "Avenida Paulista".to_string(),
                district: "Bela Vista".to_string(),
                city: "São Paulo".to_string(),
                state: "SP".to_string(),
            })
        } else {
            Err(ProviderError::NotFound(format!("postal code '{postal_code}'")))
        }
    }
}

pub fn sample_route() -> Route {
    Route {
        distance_km: 1.2,
        duration_min: 4,
        geometry: RouteGeometry {
            kind: "LineString".to_string(),
            coordinates: vec![[-46.65, -23.56], [-46.65, -23.55]],
        },
    }
}

pub fn providers(geocoder: Arc<FakeGeocoder>, router: Arc<FakeRouter>) -> Providers {
    Providers {
        geocoder,
        router,
        postal: Arc::new(FakePostal),
    }
}
