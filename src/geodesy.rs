//! Spherical-earth conversions between geodetic and local coordinates.
//!
//! The local frame is east (x) / north (y) in meters around a fixed
//! reference point. Conversions go through great-circle distance and
//! initial bearing, so they stay consistent with each other far from the
//! origin, unlike an equirectangular approximation.

use serde::{Deserialize, Serialize};

/// Mean earth radius [m]
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Radius used by the NMEA distance helper [km]
pub const EARTH_RADIUS_KM_NMEA: f64 = 6372.8;

/// Geodetic origin of the local frame
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoReference {
    pub latitude: f64,
    pub longitude: f64,
    /// Negative below mean sea level
    pub altitude: f64,
}

impl GeoReference {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }

    /// (lat, lon) in degrees -> (east, north) in meters.
    pub fn geodetic_to_local(&self, lat: f64, lon: f64) -> (f64, f64) {
        let distance = haversine_distance(self.latitude, self.longitude, lat, lon, EARTH_RADIUS_M);
        let bearing = initial_bearing_rad(self.latitude, self.longitude, lat, lon);
        (distance * bearing.sin(), distance * bearing.cos())
    }

    /// (east, north) in meters -> (lat, lon) in degrees.
    pub fn local_to_geodetic(&self, x: f64, y: f64) -> (f64, f64) {
        let distance = (x * x + y * y).sqrt();
        let bearing = x.atan2(y);
        let angular = distance / EARTH_RADIUS_M;

        let lat1 = self.latitude.to_radians();
        let lon1 = self.longitude.to_radians();

        let lat2 = (lat1.sin() * angular.cos() + lat1.cos() * angular.sin() * bearing.cos()).asin();
        let lon2 = lon1
            + (bearing.sin() * angular.sin() * lat1.cos())
                .atan2(angular.cos() - lat1.sin() * lat2.sin());

        (lat2.to_degrees(), lon2.to_degrees())
    }
}

fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64, radius: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).max(0.0).sqrt());
    radius * c
}

fn initial_bearing_rad(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
    y.atan2(x)
}

/// Great-circle distance [km] between two fixes.
pub fn haversine_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    haversine_distance(lat1, lon1, lat2, lon2, EARTH_RADIUS_KM_NMEA)
}

/// Initial bearing from the first fix to the second [deg, 0..360).
pub fn initial_bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    initial_bearing_rad(lat1, lon1, lat2, lon2)
        .to_degrees()
        .rem_euclid(360.0)
}
