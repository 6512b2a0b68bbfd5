pub mod address;
pub mod nominatim;
pub mod osrm;
pub mod viacep;

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::ProviderSettings;
use crate::geo::Coordinate;
use crate::models::delivery::Route;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// The input resolved to nothing; the user has to correct it.
    #[error("{0} not found")]
    NotFound(String),

    #[error("no route between the given points")]
    NoRoute,

    /// Network or service failure, safe to retry later.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transient(err.to_string())
    }
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Coordinate, ProviderError>;
}

#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn route(&self, start: Coordinate, end: Coordinate) -> Result<Route, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostalAddress {
    pub postal_code: String,
    pub street: String,
    pub district: String,
    pub city: String,
    pub state: String,
}

#[async_trait]
pub trait PostalLookup: Send + Sync {
    async fn lookup(&self, postal_code: &str) -> Result<PostalAddress, ProviderError>;
}

/// The external services the tracker and the intake flow talk to.
#[derive(Clone)]
pub struct Providers {
    pub geocoder: Arc<dyn Geocoder>,
    pub router: Arc<dyn RouteProvider>,
    pub postal: Arc<dyn PostalLookup>,
}

impl Providers {
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.timeout)
            .build()?;

        let nominatim = nominatim::NominatimClient::new(
            client.clone(),
            nominatim::NominatimClientParams {
                base_url: settings.geocoder_url.clone(),
                service_area: settings.service_area.clone(),
            },
        );

        Ok(Self {
            geocoder: Arc::new(CachedGeocoder::new(
                nominatim,
                settings.geocode_cache_capacity,
            )),
            router: Arc::new(osrm::OsrmRouteClient::new(
                client.clone(),
                settings.router_url.clone(),
            )),
            postal: Arc::new(viacep::ViaCepClient::new(client, settings.postal_url.clone())),
        })
    }
}

/// Remembers successful lookups keyed by the raw input string.
///
/// Failures are never cached. Once `capacity` entries are held, new results
/// are returned but not stored.
pub struct CachedGeocoder<G> {
    inner: G,
    entries: DashMap<String, Coordinate>,
    capacity: usize,
}

impl<G: Geocoder> CachedGeocoder<G> {
    pub fn new(inner: G, capacity: usize) -> Self {
        Self {
            inner,
            entries: DashMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl<G: Geocoder> Geocoder for CachedGeocoder<G> {
    async fn geocode(&self, address: &str) -> Result<Coordinate, ProviderError> {
        if let Some(hit) = self.entries.get(address) {
            debug!(address, "geocode cache hit");
            return Ok(*hit);
        }

        let coordinate = self.inner.geocode(address).await?;
        if self.entries.len() < self.capacity {
            self.entries.insert(address.to_string(), coordinate);
        }

        Ok(coordinate)
    }
}
