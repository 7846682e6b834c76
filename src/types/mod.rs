pub mod linalg;

pub use linalg::*;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Topic names used between the navigation nodes
pub mod topics {
    pub const GPS: &str = "auv.position.gps";
    pub const IMU: &str = "auv.sensors.imu";
    pub const DEPTH: &str = "auv.sensors.depth";
    pub const SPEED_ESTIMATE: &str = "auv.position.speed_estimate";
    pub const POSITION_ESTIMATE: &str = "auv.position.estimate";
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn to_nalgebra(self) -> nalgebra::Vector3<f64> {
        nalgebra::Vector3::new(self.x, self.y, self.z)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    pub fn norm(&self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// BNO055-style calibration levels, 0 (uncalibrated) to 3 (fully calibrated)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationStatus {
    pub sys: u8,
    pub gyro: u8,
    pub accel: u8,
    pub mag: u8,
}

/// One IMU sample. Any vector the driver could not read is absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuData {
    #[serde(default)]
    pub acceleration: Option<Vector3>,
    #[serde(default)]
    pub magnetometer: Option<Vector3>,
    #[serde(default)]
    pub gyroscope: Option<Vector3>,
    #[serde(default)]
    pub orientation: Option<Quaternion>,
    #[serde(default)]
    pub linear_acceleration: Option<Vector3>,
    #[serde(default)]
    pub gravity: Option<Vector3>,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub calibration_status: Option<CalibrationStatus>,
}

/// Categorical GPS link quality derived from the GGA fix-quality code
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkQuality {
    Excellent,
    Good,
    Moderate,
    Poor,
    #[default]
    Unknown,
}

impl LinkQuality {
    /// GGA quality >= 4 is excellent, 3 good, 2 moderate, anything lower poor.
    pub fn from_gga_quality(quality: Option<u32>) -> Self {
        match quality {
            None => LinkQuality::Unknown,
            Some(q) if q >= 4 => LinkQuality::Excellent,
            Some(3) => LinkQuality::Good,
            Some(2) => LinkQuality::Moderate,
            Some(_) => LinkQuality::Poor,
        }
    }

    /// Good enough to initialize the estimator or to correct it.
    pub fn is_acceptable(self) -> bool {
        matches!(self, LinkQuality::Excellent | LinkQuality::Good)
    }
}

impl fmt::Display for LinkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LinkQuality::Excellent => "excellent",
            LinkQuality::Good => "good",
            LinkQuality::Moderate => "moderate",
            LinkQuality::Poor => "poor",
            LinkQuality::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FixType {
    #[serde(rename = "NONE")]
    NoFix,
    #[serde(rename = "FIX_2D")]
    Fix2D,
    #[serde(rename = "FIX_3D")]
    Fix3D,
}

/// Aggregated GPS receiver state as published on [`topics::GPS`]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsData {
    /// Fix time [ms since Unix epoch]
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Altitude above MSL [m], negative below the surface
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Speed over ground [km/h]
    #[serde(default)]
    pub speed: Option<f64>,
    /// Course over ground [deg]
    #[serde(default)]
    pub course: Option<f64>,
    #[serde(default)]
    pub satellites: Option<u32>,
    #[serde(default)]
    pub hdop: Option<f64>,
    #[serde(default)]
    pub fix: Option<FixType>,
    #[serde(default)]
    pub link_quality: LinkQuality,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthReading {
    /// Depth below the surface [m]
    pub depth: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedEstimate {
    /// Forward speed through the water [m/s]
    pub speed: f64,
}

/// Local filter state: position [m], forward velocity [m/s], attitude
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EkfState {
    pub x: f64,
    pub y: f64,
    /// Depth, positive downward
    pub z: f64,
    pub v: f64,
    pub qw: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
}

impl EkfState {
    pub fn quaternion_norm(&self) -> f64 {
        (self.qw * self.qw + self.qx * self.qx + self.qy * self.qy + self.qz * self.qz).sqrt()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalPosition {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Fused estimate as published on [`topics::POSITION_ESTIMATE`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionEstimate {
    pub local: EkfState,
    pub global: Option<GlobalPosition>,
    /// Seconds since Unix epoch
    pub timestamp: f64,
}
