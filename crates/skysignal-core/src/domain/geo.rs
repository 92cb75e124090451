use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Validated WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGeoPoint")]
pub struct GeoPoint {
    lat: f64,
    lon: f64,
}

#[derive(Deserialize)]
struct RawGeoPoint {
    lat: f64,
    lon: f64,
}

impl TryFrom<RawGeoPoint> for GeoPoint {
    type Error = ValidationError;

    fn try_from(value: RawGeoPoint) -> Result<Self, Self::Error> {
        Self::new(value.lat, value.lon)
    }
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Result<Self, ValidationError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(ValidationError::LatitudeOutOfRange { value: lat });
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(ValidationError::LongitudeOutOfRange { value: lon });
        }
        Ok(Self { lat, lon })
    }

    pub const fn lat(self) -> f64 {
        self.lat
    }

    pub const fn lon(self) -> f64 {
        self.lon
    }

    pub fn distance_km(self, other: Self) -> f64 {
        haversine_km(self, other)
    }
}

impl Display for GeoPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4},{:.4}", self.lat, self.lon)
    }
}

/// Great-circle distance on a spherical Earth.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(matches!(
            GeoPoint::new(90.5, 0.0),
            Err(ValidationError::LatitudeOutOfRange { .. })
        ));
        assert!(matches!(
            GeoPoint::new(0.0, -180.1),
            Err(ValidationError::LongitudeOutOfRange { .. })
        ));
        assert!(matches!(
            GeoPoint::new(f64::NAN, 0.0),
            Err(ValidationError::LatitudeOutOfRange { .. })
        ));
        assert!(GeoPoint::new(-90.0, 180.0).is_ok());
    }

    #[test]
    fn haversine_matches_known_distances() {
        let limassol = GeoPoint::new(34.707, 33.022).expect("valid");
        let nicosia = GeoPoint::new(35.1856, 33.3823).expect("valid");
        let distance = haversine_km(limassol, nicosia);
        assert!((distance - 62.5).abs() < 1.5, "distance was {distance}");

        let equator_a = GeoPoint::new(0.0, 0.0).expect("valid");
        let equator_b = GeoPoint::new(0.0, 1.0).expect("valid");
        assert!((haversine_km(equator_a, equator_b) - 111.19).abs() < 0.05);
        assert_eq!(haversine_km(limassol, limassol), 0.0);
    }

    #[test]
    fn deserialization_validates_range() {
        let err = serde_json::from_str::<GeoPoint>(r#"{"lat": 120.0, "lon": 0.0}"#);
        assert!(err.is_err());
        let ok: GeoPoint = serde_json::from_str(r#"{"lat": 54.71, "lon": 20.51}"#).expect("ok");
        assert_eq!(ok.lat(), 54.71);
    }
}
