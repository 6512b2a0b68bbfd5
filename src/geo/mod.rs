use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6_371.0;
const MS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// A single timestamped reading from the courier's device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    #[serde(flatten)]
    pub position: Coordinate,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Speed as reported by the device, m/s. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_speed: Option<f64>,
}

impl LocationFix {
    pub fn at(position: Coordinate, timestamp: DateTime<Utc>) -> Self {
        Self {
            position,
            timestamp,
            heading: None,
            reported_speed: None,
        }
    }
}

pub fn haversine_km(a: &Coordinate, b: &Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * central_angle
}

/// Average speed between two fixes in km/h, rounded to one decimal.
///
/// Returns 0 when either fix is missing or when the newer fix is not strictly
/// later than the older one.
pub fn speed_kmh(previous: Option<&LocationFix>, current: Option<&LocationFix>) -> f64 {
    let (Some(previous), Some(current)) = (previous, current) else {
        return 0.0;
    };

    let elapsed_ms = (current.timestamp - previous.timestamp).num_milliseconds();
    if elapsed_ms <= 0 {
        return 0.0;
    }

    let hours = elapsed_ms as f64 / MS_PER_HOUR;
    let speed = haversine_km(&previous.position, &current.position) / hours;

    if speed.is_finite() {
        round_to(speed, 1)
    } else {
        0.0
    }
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{haversine_km, speed_kmh, Coordinate, LocationFix};

    fn fix(lat: f64, lng: f64, seconds: i64) -> LocationFix {
        let base = Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap();
        LocationFix::at(Coordinate::new(lat, lng), base + Duration::seconds(seconds))
    }

    #[test]
    fn zero_distance_for_same_point() {
        let p = Coordinate::new(-23.5505, -46.6333);
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = Coordinate::new(-23.5505, -46.6333);
        let b = Coordinate::new(-22.9068, -43.1729);
        assert_eq!(haversine_km(&a, &b), haversine_km(&b, &a));
    }

    #[test]
    fn quarter_meridian_is_around_10007_km() {
        let equator = Coordinate::new(0.0, 0.0);
        let pole = Coordinate::new(90.0, 0.0);
        let distance = haversine_km(&equator, &pole);
        assert!((distance - 10_007.5).abs() < 0.5);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = Coordinate::new(51.5074, -0.1278);
        let paris = Coordinate::new(48.8566, 2.3522);
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn speed_over_one_hour_northward() {
        let start = fix(0.0, 0.0, 0);
        let end = fix(0.01, 0.0, 3_600);
        assert_eq!(speed_kmh(Some(&start), Some(&end)), 1.1);
    }

    #[test]
    fn speed_is_zero_for_equal_timestamps() {
        let a = fix(-23.55, -46.63, 10);
        let b = fix(-23.60, -46.70, 10);
        assert_eq!(speed_kmh(Some(&a), Some(&b)), 0.0);
    }

    #[test]
    fn speed_is_zero_when_a_fix_is_missing() {
        let a = fix(-23.55, -46.63, 10);
        assert_eq!(speed_kmh(None, Some(&a)), 0.0);
        assert_eq!(speed_kmh(Some(&a), None), 0.0);
        assert_eq!(speed_kmh(None, None), 0.0);
    }

    #[test]
    fn speed_is_zero_when_clock_goes_backwards() {
        let later = fix(-23.55, -46.63, 60);
        let earlier = fix(-23.56, -46.64, 0);
        assert_eq!(speed_kmh(Some(&later), Some(&earlier)), 0.0);
    }

    #[test]
    fn coordinate_bounds_are_checked() {
        assert!(Coordinate::new(-23.5, -46.6).is_valid());
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, -181.0).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0).is_valid());
    }
}
