//! 8-Dimensional Extended Kalman Filter for vehicle position
//!
//! State Vector (8D):
//! [0-2]: Position (x east, y north, z depth positive down) relative to the
//!        first accepted GPS fix (meters)
//! [3]:   Forward velocity along the body x axis (m/s)
//! [4-7]: Quaternion (qw, qx, qy, qz), copied from the IMU's onboard fusion
//!
//! Attitude is not integrated from gyro rates; the filter trusts the IMU for
//! orientation and only estimates position and forward speed.

use nalgebra::Vector3;
use ndarray::{arr1, Array1, Array2};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::{NavError, Result};
use crate::geodesy::GeoReference;
use crate::types::linalg::*;
use crate::types::{EkfState, FixType, GlobalPosition, GpsData, ImuData, LinkQuality, Quaternion};

/// Orientations shorter than this carry no attitude
const MIN_QUATERNION_NORM: f64 = 1e-9;

/// How the covariance is corrected after a measurement
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovarianceUpdate {
    /// P = (I - KH) P
    #[default]
    Simple,
    /// P = (I - KH) P (I - KH)^T + K R K^T
    Joseph,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EkfConfig {
    /// Process noise for position
    pub q_pos: f64,
    /// Process noise for forward velocity
    pub q_vel: f64,
    /// Process noise for the quaternion components
    pub q_orient: f64,

    /// GPS position variance per link quality [m²]
    pub r_gps_excellent: f64,
    pub r_gps_good: f64,
    pub r_gps_degraded: f64,

    /// Depth sensor variance [m²]
    pub r_depth: f64,
    /// Speed sensor variance [m²/s²]
    pub r_velocity: f64,

    pub covariance_update: CovarianceUpdate,
}

impl Default for EkfConfig {
    fn default() -> Self {
        Self {
            q_pos: 0.1,
            q_vel: 0.1,
            q_orient: 0.01,
            r_gps_excellent: 5.0,
            r_gps_good: 10.0,
            r_gps_degraded: 20.0,
            r_depth: 0.01,
            r_velocity: 0.1,
            covariance_update: CovarianceUpdate::Simple,
        }
    }
}

pub struct PositionEkf {
    config: EkfConfig,

    /// State vector [8D]
    state: StateVec,

    /// Covariance matrix [8x8]
    covariance: StateMat,

    /// Local frame origin, captured from the initializing fix
    reference: GeoReference,

    last_prediction: Instant,
    last_gps_fix: Instant,

    predict_count: u64,
    gps_update_count: u64,
    depth_update_count: u64,
    velocity_update_count: u64,
}

impl PositionEkf {
    /// Initialize from a GPS fix. Refuses anything but a good/excellent 3D fix.
    pub fn new(fix: &GpsData, config: EkfConfig) -> Result<Self> {
        let reference = Self::reference_from_fix(fix)?;

        let mut state = Array1::<f64>::zeros(STATE_DIM);
        state[IDX_Z] = -reference.altitude;
        state[IDX_QW] = 1.0;

        let now = Instant::now();
        log::info!(
            "EKF initialized at ({:.6}, {:.6}), altitude {:.2} m, link {}",
            reference.latitude,
            reference.longitude,
            reference.altitude,
            fix.link_quality
        );

        Ok(Self {
            config,
            state,
            covariance: Self::default_covariance(),
            reference,
            last_prediction: now,
            last_gps_fix: now,
            predict_count: 0,
            gps_update_count: 0,
            depth_update_count: 0,
            velocity_update_count: 0,
        })
    }

    /// Acceptance predicate for initialization.
    pub fn fix_sufficient(fix: &GpsData) -> bool {
        Self::reference_from_fix(fix).is_ok()
    }

    fn reference_from_fix(fix: &GpsData) -> Result<GeoReference> {
        if !fix.link_quality.is_acceptable() {
            return Err(NavError::Initialization(format!(
                "insufficient link quality '{}'",
                fix.link_quality
            )));
        }
        if fix.fix != Some(FixType::Fix3D) {
            return Err(NavError::Initialization(format!(
                "insufficient fix {:?}",
                fix.fix
            )));
        }
        let altitude = fix
            .altitude
            .ok_or_else(|| NavError::Initialization("fix has no altitude".to_string()))?;
        match (fix.latitude, fix.longitude) {
            (Some(lat), Some(lon)) => Ok(GeoReference::new(lat, lon, altitude)),
            _ => Err(NavError::Initialization(
                "fix has no horizontal position".to_string(),
            )),
        }
    }

    fn default_covariance() -> StateMat {
        let mut p = zeros(STATE_DIM, STATE_DIM);
        let diag = [
            100.0, // x
            100.0, // y
            1.0,   // z
            10.0,  // v
            0.1,   // qw
            0.1,   // qx
            0.1,   // qy
            0.1,   // qz
        ];
        for (idx, value) in diag.iter().enumerate() {
            p[[idx, idx]] = *value;
        }
        p
    }

    /// Body x axis in the local frame: first column of R(q).
    fn forward_axis(q: &Quaternion) -> Vector3<f64> {
        let (w, x, y, z) = (q.w, q.x, q.y, q.z);
        Vector3::new(
            1.0 - 2.0 * (y * y + z * z),
            2.0 * (x * y + w * z),
            2.0 * (x * z - w * y),
        )
    }

    fn build_transition_jacobian(dt: f64, forward: &Vector3<f64>, forward_acc: f64) -> StateMat {
        let mut f = identity(STATE_DIM);

        // Position depends on velocity along the forward axis
        f[[IDX_X, IDX_V]] = forward[0] * dt;
        f[[IDX_Y, IDX_V]] = forward[1] * dt;
        f[[IDX_Z, IDX_V]] = forward[2] * dt;

        f[[IDX_V, IDX_V]] = 1.0 + forward_acc * dt;

        // Quaternion rows stay identity: attitude comes from the IMU
        f
    }

    fn build_process_noise(&self, dt: f64) -> StateMat {
        let q_pos = self.config.q_pos;
        let q_vel = self.config.q_vel;
        let q_orient = self.config.q_orient;

        let mut q = zeros(STATE_DIM, STATE_DIM);
        for i in IDX_X..=IDX_Z {
            q[[i, i]] = q_pos * dt.powi(4) / 4.0;
            q[[i, IDX_V]] = q_pos * dt.powi(3) / 2.0;
            q[[IDX_V, i]] = q_pos * dt.powi(3) / 2.0;
        }
        q[[IDX_V, IDX_V]] = q_vel * dt.powi(2);
        for i in IDX_QW..=IDX_QZ {
            q[[i, i]] = q_orient * dt.powi(2);
        }
        q
    }

    /// Time update driven by an IMU sample, dt measured from the last call.
    ///
    /// Returns `false` when the sample lacks a usable orientation or linear
    /// acceleration; state and covariance are then untouched.
    pub fn predict(&mut self, imu: &ImuData) -> bool {
        let now = Instant::now();
        let dt = now.duration_since(self.last_prediction).as_secs_f64();
        self.last_prediction = now;
        self.predict_with_dt(imu, dt)
    }

    /// Time update with an explicit step [s].
    pub fn predict_with_dt(&mut self, imu: &ImuData, dt: f64) -> bool {
        let (orientation, linear_acc) = match (imu.orientation, imu.linear_acceleration) {
            (Some(q), Some(a)) => (q, a),
            _ => return false,
        };
        // Fusion chips report an all-zero quaternion until they settle
        let norm = orientation.norm();
        if !norm.is_finite() || norm <= MIN_QUATERNION_NORM {
            log::debug!("Skipping IMU sample with degenerate orientation (norm {})", norm);
            return false;
        }
        if ![linear_acc.x, linear_acc.y, linear_acc.z].iter().all(|c| c.is_finite()) {
            log::debug!("Skipping IMU sample with non-finite linear acceleration");
            return false;
        }

        self.state[IDX_QW] = orientation.w;
        self.state[IDX_QX] = orientation.x;
        self.state[IDX_QY] = orientation.y;
        self.state[IDX_QZ] = orientation.z;
        self.normalize_quaternion();

        let forward = Self::forward_axis(&self.attitude());
        let forward_acc = linear_acc.to_nalgebra().dot(&forward);

        let v = self.state[IDX_V];
        self.state[IDX_X] += v * forward[0] * dt;
        self.state[IDX_Y] += v * forward[1] * dt;
        self.state[IDX_Z] += v * forward[2] * dt;
        self.state[IDX_V] += forward_acc * dt;

        let f = Self::build_transition_jacobian(dt, &forward, forward_acc);
        let q = self.build_process_noise(dt);
        self.covariance = f.dot(&self.covariance).dot(&f.t()) + q;

        self.predict_count += 1;
        true
    }

    /// GPS position correction. Fixes below good link quality are ignored.
    pub fn update_gps(&mut self, fix: &GpsData) -> Result<()> {
        if !fix.link_quality.is_acceptable() {
            log::debug!("Ignoring GPS fix with link quality '{}'", fix.link_quality);
            return Ok(());
        }
        let (lat, lon, altitude) = match (fix.latitude, fix.longitude, fix.altitude) {
            (Some(lat), Some(lon), Some(alt)) => (lat, lon, alt),
            _ => {
                log::debug!("Ignoring GPS fix without full 3D position");
                return Ok(());
            }
        };

        let (x, y) = self.reference.geodetic_to_local(lat, lon);
        let z = -altitude;

        let h = selection_matrix(&[IDX_X, IDX_Y, IDX_Z]);
        let innovation = arr1(&[
            x - self.state[IDX_X],
            y - self.state[IDX_Y],
            z - self.state[IDX_Z],
        ]);
        let r = identity(3) * self.gps_noise(fix.link_quality);

        self.kalman_update(&h, &innovation, &r)?;
        self.last_gps_fix = Instant::now();
        self.gps_update_count += 1;
        Ok(())
    }

    /// Depth correction [m, positive down].
    pub fn update_depth(&mut self, depth: f64) -> Result<()> {
        let h = selection_matrix(&[IDX_Z]);
        let innovation = arr1(&[depth - self.state[IDX_Z]]);
        let r = Array2::from_elem((1, 1), self.config.r_depth);
        self.kalman_update(&h, &innovation, &r)?;
        self.depth_update_count += 1;
        Ok(())
    }

    /// Forward speed correction [m/s].
    pub fn update_velocity(&mut self, speed: f64) -> Result<()> {
        let h = selection_matrix(&[IDX_V]);
        let innovation = arr1(&[speed - self.state[IDX_V]]);
        let r = Array2::from_elem((1, 1), self.config.r_velocity);
        self.kalman_update(&h, &innovation, &r)?;
        self.velocity_update_count += 1;
        Ok(())
    }

    fn gps_noise(&self, quality: LinkQuality) -> f64 {
        match quality {
            LinkQuality::Excellent => self.config.r_gps_excellent,
            LinkQuality::Good => self.config.r_gps_good,
            _ => self.config.r_gps_degraded,
        }
    }

    /// Linear measurement update. Nothing is modified if S cannot be inverted.
    fn kalman_update(
        &mut self,
        h: &Array2<f64>,
        innovation: &Array1<f64>,
        r: &Array2<f64>,
    ) -> Result<()> {
        let p = &self.covariance;
        let h_t = h.t();

        let s = h.dot(p).dot(&h_t) + r;
        let s_inv = invert_innovation(&s)?;

        let k = p.dot(&h_t).dot(&s_inv);
        let dx = k.dot(innovation);
        let i_kh = identity(STATE_DIM) - k.dot(h);

        let p_new = match self.config.covariance_update {
            CovarianceUpdate::Simple => i_kh.dot(p),
            CovarianceUpdate::Joseph => {
                i_kh.dot(p).dot(&i_kh.t()) + k.dot(r).dot(&k.t())
            }
        };

        self.state = &self.state + &dx;
        self.covariance = p_new;
        self.normalize_quaternion();
        Ok(())
    }

    fn normalize_quaternion(&mut self) {
        let norm = (IDX_QW..=IDX_QZ)
            .map(|i| self.state[i] * self.state[i])
            .sum::<f64>()
            .sqrt();
        if norm > MIN_QUATERNION_NORM && norm.is_finite() {
            for i in IDX_QW..=IDX_QZ {
                self.state[i] /= norm;
            }
        }
    }

    pub fn state(&self) -> EkfState {
        EkfState {
            x: self.state[IDX_X],
            y: self.state[IDX_Y],
            z: self.state[IDX_Z],
            v: self.state[IDX_V],
            qw: self.state[IDX_QW],
            qx: self.state[IDX_QX],
            qy: self.state[IDX_QY],
            qz: self.state[IDX_QZ],
        }
    }

    fn attitude(&self) -> Quaternion {
        Quaternion::new(
            self.state[IDX_QW],
            self.state[IDX_QX],
            self.state[IDX_QY],
            self.state[IDX_QZ],
        )
    }

    pub fn covariance(&self) -> &StateMat {
        &self.covariance
    }

    pub fn reference(&self) -> &GeoReference {
        &self.reference
    }

    pub fn last_gps_fix(&self) -> Instant {
        self.last_gps_fix
    }

    /// Current local position converted back to lat/lon; altitude is -z.
    pub fn global_position(&self) -> GlobalPosition {
        let (latitude, longitude) = self
            .reference
            .local_to_geodetic(self.state[IDX_X], self.state[IDX_Y]);
        GlobalPosition {
            latitude,
            longitude,
            altitude: -self.state[IDX_Z],
        }
    }

    pub fn estimate(&self, timestamp: f64) -> crate::types::PositionEstimate {
        crate::types::PositionEstimate {
            local: self.state(),
            global: Some(self.global_position()),
            timestamp,
        }
    }

    pub fn covariance_trace(&self) -> f64 {
        (0..STATE_DIM).map(|i| self.covariance[[i, i]]).sum()
    }

    /// (predicts, gps, depth, velocity) update counters
    pub fn update_counts(&self) -> (u64, u64, u64, u64) {
        (
            self.predict_count,
            self.gps_update_count,
            self.depth_update_count,
            self.velocity_update_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vector3 as Vec3;
    use approx::assert_abs_diff_eq;

    fn good_fix() -> GpsData {
        GpsData {
            latitude: Some(37.0),
            longitude: Some(-122.0),
            altitude: Some(10.0),
            fix: Some(FixType::Fix3D),
            link_quality: LinkQuality::Excellent,
            ..Default::default()
        }
    }

    fn imu(orientation: Quaternion, linear_acc: Vec3) -> ImuData {
        ImuData {
            orientation: Some(orientation),
            linear_acceleration: Some(linear_acc),
            ..Default::default()
        }
    }

    /// Rotation of `angle` radians about the local z axis
    fn yaw(angle: f64) -> Quaternion {
        Quaternion::new((angle / 2.0).cos(), 0.0, 0.0, (angle / 2.0).sin())
    }

    #[test]
    fn test_initialization_sets_origin() {
        let ekf = PositionEkf::new(&good_fix(), EkfConfig::default()).unwrap();
        let state = ekf.state();
        assert_eq!((state.x, state.y, state.z), (0.0, 0.0, -10.0));
        assert_eq!(state.v, 0.0);
        assert_eq!(state.qw, 1.0);
        assert_eq!(ekf.reference().latitude, 37.0);
        assert_eq!(ekf.reference().altitude, 10.0);
    }

    #[test]
    fn test_initialization_gating() {
        for quality in [
            LinkQuality::Poor,
            LinkQuality::Moderate,
            LinkQuality::Unknown,
        ] {
            let fix = GpsData {
                link_quality: quality,
                ..good_fix()
            };
            assert!(matches!(
                PositionEkf::new(&fix, EkfConfig::default()),
                Err(NavError::Initialization(_))
            ));
        }

        let fix_2d = GpsData {
            fix: Some(FixType::Fix2D),
            ..good_fix()
        };
        assert!(PositionEkf::new(&fix_2d, EkfConfig::default()).is_err());

        let no_fix = GpsData {
            fix: None,
            ..good_fix()
        };
        assert!(PositionEkf::new(&no_fix, EkfConfig::default()).is_err());

        let no_altitude = GpsData {
            altitude: None,
            ..good_fix()
        };
        assert!(PositionEkf::new(&no_altitude, EkfConfig::default()).is_err());

        let good = GpsData {
            link_quality: LinkQuality::Good,
            ..good_fix()
        };
        assert!(PositionEkf::fix_sufficient(&good));
    }

    #[test]
    fn test_partial_imu_predict_is_noop() {
        let mut ekf = PositionEkf::new(&good_fix(), EkfConfig::default()).unwrap();
        ekf.update_velocity(1.0).unwrap();
        let state_before = ekf.state();
        let cov_before = ekf.covariance().clone();

        let no_orientation = ImuData {
            linear_acceleration: Some(Vec3::new(1.0, 0.0, 0.0)),
            ..Default::default()
        };
        let no_linear_acc = ImuData {
            orientation: Some(yaw(0.3)),
            ..Default::default()
        };

        assert!(!ekf.predict_with_dt(&no_orientation, 1.0));
        assert!(!ekf.predict_with_dt(&no_linear_acc, 1.0));
        assert!(!ekf.predict(&ImuData::default()));

        assert_eq!(ekf.state(), state_before);
        assert_eq!(ekf.covariance(), &cov_before);
    }

    #[test]
    fn test_degenerate_orientation_is_noop() {
        let mut ekf = PositionEkf::new(&good_fix(), EkfConfig::default()).unwrap();
        ekf.update_velocity(1.0).unwrap();
        let state_before = ekf.state();
        let cov_before = ekf.covariance().clone();

        let samples = [
            imu(Quaternion::new(0.0, 0.0, 0.0, 0.0), Vec3::default()),
            imu(Quaternion::new(f64::NAN, 0.0, 0.0, 1.0), Vec3::default()),
            imu(Quaternion::new(f64::INFINITY, 0.0, 0.0, 0.0), Vec3::default()),
            imu(Quaternion::identity(), Vec3::new(f64::NAN, 0.0, 0.0)),
        ];
        for sample in &samples {
            assert!(!ekf.predict_with_dt(sample, 0.1));
        }

        assert_eq!(ekf.state(), state_before);
        assert_eq!(ekf.covariance(), &cov_before);
        assert_abs_diff_eq!(ekf.state().quaternion_norm(), 1.0, epsilon = 1e-9);
        assert_eq!(ekf.update_counts().0, 0);
    }

    #[test]
    fn test_stationary_predict_keeps_position() {
        let mut ekf = PositionEkf::new(&good_fix(), EkfConfig::default()).unwrap();
        assert!(ekf.predict_with_dt(&imu(Quaternion::identity(), Vec3::default()), 1.0));

        let state = ekf.state();
        assert_eq!(state.x, 0.0);
        assert_eq!(state.y, 0.0);
        assert_eq!(state.v, 0.0);
        assert_eq!(state.z, -10.0);
    }

    #[test]
    fn test_predict_moves_along_heading() {
        let mut ekf = PositionEkf::new(&good_fix(), EkfConfig::default()).unwrap();
        let heading = std::f64::consts::FRAC_PI_2; // nose along +y

        // Accelerate at 1 m/s² for one second, then coast for one
        assert!(ekf.predict_with_dt(&imu(yaw(heading), Vec3::new(0.0, 1.0, 0.0)), 1.0));
        assert_abs_diff_eq!(ekf.state().v, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ekf.state().y, 0.0, epsilon = 1e-12);

        assert!(ekf.predict_with_dt(&imu(yaw(heading), Vec3::default()), 1.0));
        let state = ekf.state();
        assert_abs_diff_eq!(state.y, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(state.x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(state.v, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_quaternion_stays_unit() {
        let mut ekf = PositionEkf::new(&good_fix(), EkfConfig::default()).unwrap();
        let skewed = Quaternion::new(2.0, 0.4, -0.2, 0.9);
        ekf.predict_with_dt(&imu(skewed, Vec3::new(0.3, 0.1, 0.0)), 0.1);
        assert_abs_diff_eq!(ekf.state().quaternion_norm(), 1.0, epsilon = 1e-12);

        ekf.update_velocity(0.5).unwrap();
        assert_abs_diff_eq!(ekf.state().quaternion_norm(), 1.0, epsilon = 1e-12);

        ekf.update_depth(12.0).unwrap();
        ekf.update_gps(&good_fix()).unwrap();
        assert_abs_diff_eq!(ekf.state().quaternion_norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_predict_grows_covariance() {
        let mut ekf = PositionEkf::new(&good_fix(), EkfConfig::default()).unwrap();
        let trace_before = ekf.covariance_trace();
        ekf.predict_with_dt(&imu(Quaternion::identity(), Vec3::default()), 0.5);
        assert!(ekf.covariance_trace() > trace_before);
        assert!(max_asymmetry(ekf.covariance()) < 1e-12);
    }

    #[test]
    fn test_depth_update_pulls_toward_measurement() {
        let mut ekf = PositionEkf::new(&good_fix(), EkfConfig::default()).unwrap();
        ekf.update_depth(5.0).unwrap();

        // P_zz = 1, R = 0.01 => K = 1 / 1.01
        let expected = -10.0 + 15.0 / 1.01;
        assert_abs_diff_eq!(ekf.state().z, expected, epsilon = 1e-9);
        assert_abs_diff_eq!(ekf.covariance()[[IDX_Z, IDX_Z]], 0.01 / 1.01, epsilon = 1e-12);
    }

    #[test]
    fn test_velocity_update() {
        let mut ekf = PositionEkf::new(&good_fix(), EkfConfig::default()).unwrap();
        ekf.update_velocity(2.0).unwrap();
        // P_vv = 10, R = 0.1 => K = 10 / 10.1
        assert_abs_diff_eq!(ekf.state().v, 2.0 * 10.0 / 10.1, epsilon = 1e-9);
        assert_eq!(ekf.update_counts().3, 1);
    }

    #[test]
    fn test_gps_update_corrects_position() {
        let mut ekf = PositionEkf::new(&good_fix(), EkfConfig::default()).unwrap();
        let moved = GpsData {
            latitude: Some(37.0001),
            ..good_fix()
        };
        let (_, north) = ekf.reference().geodetic_to_local(37.0001, -122.0);
        ekf.update_gps(&moved).unwrap();

        // P_yy = 100, R = 5 => K = 100 / 105
        assert_abs_diff_eq!(ekf.state().y, north * 100.0 / 105.0, epsilon = 1e-9);
        assert_eq!(ekf.update_counts().1, 1);
    }

    #[test]
    fn test_degraded_gps_is_ignored() {
        let mut ekf = PositionEkf::new(&good_fix(), EkfConfig::default()).unwrap();
        let before = ekf.state();
        let cov_before = ekf.covariance().clone();
        let degraded = GpsData {
            latitude: Some(37.01),
            link_quality: LinkQuality::Moderate,
            ..good_fix()
        };
        ekf.update_gps(&degraded).unwrap();
        assert_eq!(ekf.state(), before);
        assert_eq!(ekf.covariance(), &cov_before);
        assert_eq!(ekf.update_counts().1, 0);
    }

    #[test]
    fn test_singular_update_leaves_state_untouched() {
        let config = EkfConfig {
            r_velocity: 0.0,
            ..EkfConfig::default()
        };
        let mut ekf = PositionEkf::new(&good_fix(), config).unwrap();
        // Drive P_vv to zero with a perfect velocity measurement, then try again
        ekf.update_velocity(1.0).unwrap();
        let before = ekf.state();
        let cov_before = ekf.covariance().clone();

        let err = ekf.update_velocity(3.0).unwrap_err();
        assert!(matches!(err, NavError::Numerical(_)));
        assert_eq!(ekf.state(), before);
        assert_eq!(ekf.covariance(), &cov_before);
    }

    #[test]
    fn test_joseph_form_keeps_symmetry() {
        let config = EkfConfig {
            covariance_update: CovarianceUpdate::Joseph,
            ..EkfConfig::default()
        };
        let mut ekf = PositionEkf::new(&good_fix(), config).unwrap();
        for step in 0..20 {
            let heading = step as f64 * 0.1;
            ekf.predict_with_dt(&imu(yaw(heading), Vec3::new(0.2, 0.1, 0.0)), 0.1);
            ekf.update_velocity(0.5).unwrap();
            ekf.update_depth(10.0).unwrap();
        }
        assert!(max_asymmetry(ekf.covariance()) < 1e-9);
        for i in 0..STATE_DIM {
            assert!(ekf.covariance()[[i, i]] >= 0.0);
        }
    }

    #[test]
    fn test_global_position_round_trip() {
        let mut ekf = PositionEkf::new(&good_fix(), EkfConfig::default()).unwrap();
        let global = ekf.global_position();
        assert_abs_diff_eq!(global.latitude, 37.0, epsilon = 1e-9);
        assert_abs_diff_eq!(global.longitude, -122.0, epsilon = 1e-9);
        assert_abs_diff_eq!(global.altitude, 10.0, epsilon = 1e-12);

        ekf.update_depth(20.0).unwrap();
        let estimate = ekf.estimate(1234.5);
        assert_eq!(estimate.timestamp, 1234.5);
        assert_abs_diff_eq!(
            estimate.global.unwrap().altitude,
            -estimate.local.z,
            epsilon = 1e-12
        );
    }
}
