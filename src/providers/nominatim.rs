use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::ServiceArea;
use crate::geo::Coordinate;
use crate::providers::address::normalize_address;
use crate::providers::{Geocoder, ProviderError};

pub const NOMINATIM_SEARCH_PATH: &str = "/search";

/// One entry of a `/search?format=json` response. Nominatim encodes the
/// coordinates as strings.
#[derive(Debug, Deserialize)]
pub struct NominatimPlace {
    pub lat: String,
    pub lon: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

pub struct NominatimClientParams {
    pub base_url: String,
    pub service_area: ServiceArea,
}

/// Geocoding client for a Nominatim-compatible search API.
///
/// The underlying `reqwest::Client` must carry a User-Agent; the public
/// instance rejects anonymous traffic.
pub struct NominatimClient {
    params: NominatimClientParams,
    client: reqwest::Client,
}

impl NominatimClient {
    pub fn new(client: reqwest::Client, params: NominatimClientParams) -> Self {
        Self { params, client }
    }

    pub fn search_url(&self) -> String {
        format!(
            "{}{}",
            self.params.base_url.trim_end_matches('/'),
            NOMINATIM_SEARCH_PATH
        )
    }
}

#[async_trait]
impl Geocoder for NominatimClient {
    async fn geocode(&self, address: &str) -> Result<Coordinate, ProviderError> {
        let query = normalize_address(address, &self.params.service_area);
        if query.is_empty() {
            return Err(ProviderError::NotFound("empty address".to_string()));
        }

        debug!(query = %query, "Nominatim: searching address");

        let response = self
            .client
            .get(self.search_url())
            .query(&[("format", "json"), ("limit", "1"), ("q", query.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(ProviderError::Transient(format!(
                "geocoder answered HTTP {status}"
            )));
        }

        let places: Vec<NominatimPlace> = response.json().await?;
        first_coordinate(&places, address)
    }
}

pub fn first_coordinate(places: &[NominatimPlace], address: &str) -> Result<Coordinate, ProviderError> {
    let place = places
        .first()
        .ok_or_else(|| ProviderError::NotFound(format!("address '{address}'")))?;

    let lat = place.lat.trim().parse::<f64>();
    let lng = place.lon.trim().parse::<f64>();

    match (lat, lng) {
        (Ok(lat), Ok(lng)) if Coordinate::new(lat, lng).is_valid() => Ok(Coordinate::new(lat, lng)),
        _ => Err(ProviderError::Transient(format!(
            "malformed coordinates in geocoder response: {}, {}",
            place.lat, place.lon
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::{first_coordinate, NominatimClient, NominatimClientParams, NominatimPlace};
    use crate::config::ServiceArea;
    use crate::geo::Coordinate;
    use crate::providers::{Geocoder, ProviderError};

    fn places(json: &str) -> Vec<NominatimPlace> {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn takes_first_result() {
        let found = places(
            r#"[{"lat":"-23.5613","lon":"-46.6565","display_name":"Avenida Paulista"},
                {"lat":"-22.0","lon":"-47.0"}]"#,
        );
        let coordinate = first_coordinate(&found, "Av. Paulista").unwrap();
        assert_eq!(coordinate, Coordinate::new(-23.5613, -46.6565));
    }

    #[test]
    fn empty_result_is_not_found() {
        let result = first_coordinate(&places("[]"), "Rua Inexistente 999");
        assert!(matches!(result, Err(ProviderError::NotFound(_))));
    }

    #[test]
    fn garbage_coordinates_are_transient() {
        let result = first_coordinate(&places(r#"[{"lat":"abc","lon":"1"}]"#), "x");
        assert!(matches!(result, Err(ProviderError::Transient(_))));
    }

    #[tokio::test]
    async fn unreachable_service_is_transient() {
        let client = NominatimClient::new(
            reqwest::Client::new(),
            NominatimClientParams {
                base_url: "http://127.0.0.1:1".to_string(),
                service_area: ServiceArea::default(),
            },
        );

        let result = client.geocode("Rua Augusta, 100").await;
        assert!(matches!(result, Err(ProviderError::Transient(_))));
    }

    #[tokio::test]
    async fn blank_address_is_not_found_without_a_request() {
        let client = NominatimClient::new(
            reqwest::Client::new(),
            NominatimClientParams {
                base_url: "http://127.0.0.1:1".to_string(),
                service_area: ServiceArea::default(),
            },
        );

        let result = client.geocode("  CEP: ").await;
        assert!(matches!(result, Err(ProviderError::NotFound(_))));
    }
}
