use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::geo::{round_to, Coordinate};
use crate::models::delivery::{Route, RouteGeometry};
use crate::providers::{ProviderError, RouteProvider};

pub const OSRM_ROUTE_API_PATH: &str = "/route/v1/driving/";

#[derive(Debug, Deserialize)]
pub struct OsrmRouteResponse {
    pub code: String,
    #[serde(default)]
    pub routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
pub struct OsrmRoute {
    /// Meters
    pub distance: f64,

    /// Seconds
    pub duration: f64,

    pub geometry: RouteGeometry,
}

pub struct OsrmRouteClient {
    base_url: String,
    client: reqwest::Client,
}

impl OsrmRouteClient {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { base_url, client }
    }

    pub fn route_url(&self, start: Coordinate, end: Coordinate) -> String {
        format!(
            "{}{}{},{};{},{}",
            self.base_url.trim_end_matches('/'),
            OSRM_ROUTE_API_PATH,
            start.lng,
            start.lat,
            end.lng,
            end.lat
        )
    }
}

#[async_trait]
impl RouteProvider for OsrmRouteClient {
    async fn route(&self, start: Coordinate, end: Coordinate) -> Result<Route, ProviderError> {
        let url = self.route_url(start, end);
        debug!(url = %url, "OSRM: requesting route");

        let response = self
            .client
            .get(url)
            .query(&[("overview", "full"), ("geometries", "geojson")])
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ProviderError::Transient(format!(
                "router answered HTTP {}",
                status.as_u16()
            )));
        }

        let body = response.text().await?;
        match serde_json::from_str::<OsrmRouteResponse>(&body) {
            Ok(parsed) => route_from_response(parsed),
            Err(err) if status.is_success() => Err(ProviderError::Transient(format!(
                "unreadable router response: {err}"
            ))),
            Err(_) => Err(ProviderError::Transient(format!(
                "router answered HTTP {}",
                status.as_u16()
            ))),
        }
    }
}

/// Converts the first OSRM route into one-decimal kilometers and whole
/// minutes. Any code other than `Ok`, or an empty route list, is `NoRoute`.
pub fn route_from_response(response: OsrmRouteResponse) -> Result<Route, ProviderError> {
    if response.code != "Ok" {
        return Err(ProviderError::NoRoute);
    }

    let route = response
        .routes
        .into_iter()
        .next()
        .ok_or(ProviderError::NoRoute)?;

    Ok(Route {
        distance_km: round_to(route.distance / 1_000.0, 1),
        duration_min: (route.duration / 60.0).round().max(0.0) as u32,
        geometry: route.geometry,
    })
}

#[cfg(test)]
mod tests {
    use super::{route_from_response, OsrmRouteClient, OsrmRouteResponse};
    use crate::geo::Coordinate;
    use crate::providers::{ProviderError, RouteProvider};

    fn response(json: &str) -> OsrmRouteResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn converts_units_of_first_route() {
        let parsed = response(
            r#"{"code":"Ok","routes":[{"distance":4321.0,"duration":751.0,
                "geometry":{"type":"LineString","coordinates":[[-46.63,-23.55],[-46.65,-23.56]]}}]}"#,
        );

        let route = route_from_response(parsed).unwrap();
        assert_eq!(route.distance_km, 4.3);
        assert_eq!(route.duration_min, 13);
        assert_eq!(route.geometry.kind, "LineString");
        assert_eq!(route.geometry.coordinates.len(), 2);
    }

    #[test]
    fn non_ok_code_is_no_route() {
        let parsed = response(r#"{"code":"NoRoute","message":"Impossible route"}"#);
        assert_eq!(route_from_response(parsed), Err(ProviderError::NoRoute));
    }

    #[test]
    fn empty_route_list_is_no_route() {
        let parsed = response(r#"{"code":"Ok","routes":[]}"#);
        assert_eq!(route_from_response(parsed), Err(ProviderError::NoRoute));
    }

    #[test]
    fn url_uses_lng_lat_order() {
        let client = OsrmRouteClient::new(
            reqwest::Client::new(),
            "https://router.example.org/".to_string(),
        );
        let url = client.route_url(Coordinate::new(-23.5, -46.6), Coordinate::new(-23.6, -46.7));
        assert_eq!(
            url,
            "https://router.example.org/route/v1/driving/-46.6,-23.5;-46.7,-23.6"
        );
    }

    #[tokio::test]
    async fn unreachable_service_is_transient() {
        let client = OsrmRouteClient::new(reqwest::Client::new(), "http://127.0.0.1:1".to_string());
        let result = client
            .route(Coordinate::new(-23.5, -46.6), Coordinate::new(-23.6, -46.7))
            .await;
        assert!(matches!(result, Err(ProviderError::Transient(_))));
    }
}
