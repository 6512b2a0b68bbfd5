use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub static_dir: String,
    pub providers: ProviderSettings,
    pub tracking: TrackingSettings,
}

/// Endpoints and identity used for the public geo services.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub geocoder_url: String,
    pub router_url: String,
    pub postal_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub service_area: ServiceArea,
    pub geocode_cache_capacity: usize,
}

/// Locality suffix appended to addresses that do not already name it.
#[derive(Debug, Clone)]
pub struct ServiceArea {
    pub locality: String,
    pub region: String,
    pub country: String,
}

#[derive(Debug, Clone, Copy)]
pub struct TrackingSettings {
    pub arrival_threshold_m: f64,
    pub route_refresh: Duration,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            arrival_threshold_m: 50.0,
            route_refresh: Duration::from_secs(10),
        }
    }
}

impl TrackingSettings {
    /// Rejects settings the refresh task cannot run with.
    pub fn validate(self) -> Result<Self, AppError> {
        if self.route_refresh.is_zero() {
            return Err(AppError::Internal(
                "ROUTE_REFRESH_SECS must be greater than zero".to_string(),
            ));
        }
        if !self.arrival_threshold_m.is_finite() || self.arrival_threshold_m < 0.0 {
            return Err(AppError::Internal(format!(
                "ARRIVAL_THRESHOLD_METERS must be a non-negative number, got {}",
                self.arrival_threshold_m
            )));
        }
        Ok(self)
    }
}

impl Default for ServiceArea {
    fn default() -> Self {
        Self {
            locality: "Sao Paulo".to_string(),
            region: "SP".to_string(),
            country: "Brasil".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let defaults = ServiceArea::default();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            static_dir: env::var("STATIC_DIR").unwrap_or_else(|_| "static".to_string()),
            providers: ProviderSettings {
                geocoder_url: string_or_default(
                    "GEOCODER_URL",
                    "https://nominatim.openstreetmap.org",
                ),
                router_url: string_or_default("ROUTER_URL", "https://router.project-osrm.org"),
                postal_url: string_or_default("POSTAL_URL", "https://viacep.com.br/ws"),
                user_agent: env::var("HTTP_USER_AGENT").unwrap_or_else(|_| {
                    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
                }),
                timeout: Duration::from_secs(parse_or_default("HTTP_TIMEOUT_SECS", 10)?),
                service_area: ServiceArea {
                    locality: string_or_default("SERVICE_LOCALITY", &defaults.locality),
                    region: string_or_default("SERVICE_REGION", &defaults.region),
                    country: string_or_default("SERVICE_COUNTRY", &defaults.country),
                },
                geocode_cache_capacity: parse_or_default("GEOCODE_CACHE_CAPACITY", 512)?,
            },
            tracking: TrackingSettings {
                arrival_threshold_m: parse_or_default("ARRIVAL_THRESHOLD_METERS", 50.0)?,
                route_refresh: Duration::from_secs(parse_or_default("ROUTE_REFRESH_SECS", 10)?),
            }
            .validate()?,
        })
    }
}

fn string_or_default(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|raw| raw.trim().trim_end_matches('/').to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
