//! Linear algebra helpers for the position filter
//!
//! State layout and the handful of matrix primitives the EKF needs.
//! Multiply/add/subtract/transpose come straight from ndarray; the
//! innovation covariance inverse is closed-form because the filter only
//! ever inverts 1x1 (depth, velocity) and 3x3 (GPS) blocks.

use ndarray::{Array1, Array2};

use crate::error::{NavError, Result};

// ===== State Layout =====
pub const STATE_DIM: usize = 8;

pub const IDX_X: usize = 0;
pub const IDX_Y: usize = 1;
pub const IDX_Z: usize = 2;
pub const IDX_V: usize = 3;
pub const IDX_QW: usize = 4;
pub const IDX_QX: usize = 5;
pub const IDX_QY: usize = 6;
pub const IDX_QZ: usize = 7;

pub type StateVec = Array1<f64>;
pub type StateMat = Array2<f64>;

/// Determinants below this are treated as singular
pub const SINGULAR_EPSILON: f64 = 1e-12;

pub fn identity(n: usize) -> Array2<f64> {
    Array2::eye(n)
}

pub fn zeros(rows: usize, cols: usize) -> Array2<f64> {
    Array2::zeros((rows, cols))
}

/// Observation matrix picking `indices` out of the state vector, one row each.
pub fn selection_matrix(indices: &[usize]) -> Array2<f64> {
    let mut h = zeros(indices.len(), STATE_DIM);
    for (row, &col) in indices.iter().enumerate() {
        h[[row, col]] = 1.0;
    }
    h
}

/// Closed-form 3x3 inverse via cofactors.
pub fn invert_3x3(m: &Array2<f64>) -> Result<Array2<f64>> {
    if m.dim() != (3, 3) {
        return Err(NavError::Numerical(format!(
            "expected 3x3 matrix, got {:?}",
            m.dim()
        )));
    }

    let c00 = m[[1, 1]] * m[[2, 2]] - m[[1, 2]] * m[[2, 1]];
    let c01 = m[[1, 2]] * m[[2, 0]] - m[[1, 0]] * m[[2, 2]];
    let c02 = m[[1, 0]] * m[[2, 1]] - m[[1, 1]] * m[[2, 0]];

    let det = m[[0, 0]] * c00 + m[[0, 1]] * c01 + m[[0, 2]] * c02;
    if !det.is_finite() || det.abs() < SINGULAR_EPSILON {
        return Err(NavError::Numerical(format!(
            "singular 3x3 matrix (det = {det:e})"
        )));
    }
    let inv_det = 1.0 / det;

    let mut inv = zeros(3, 3);
    inv[[0, 0]] = c00 * inv_det;
    inv[[0, 1]] = (m[[0, 2]] * m[[2, 1]] - m[[0, 1]] * m[[2, 2]]) * inv_det;
    inv[[0, 2]] = (m[[0, 1]] * m[[1, 2]] - m[[0, 2]] * m[[1, 1]]) * inv_det;
    inv[[1, 0]] = c01 * inv_det;
    inv[[1, 1]] = (m[[0, 0]] * m[[2, 2]] - m[[0, 2]] * m[[2, 0]]) * inv_det;
    inv[[1, 2]] = (m[[0, 2]] * m[[1, 0]] - m[[0, 0]] * m[[1, 2]]) * inv_det;
    inv[[2, 0]] = c02 * inv_det;
    inv[[2, 1]] = (m[[0, 1]] * m[[2, 0]] - m[[0, 0]] * m[[2, 1]]) * inv_det;
    inv[[2, 2]] = (m[[0, 0]] * m[[1, 1]] - m[[0, 1]] * m[[1, 0]]) * inv_det;
    Ok(inv)
}

/// Inverse of an innovation covariance `S`.
///
/// Only the 1x1 and 3x3 shapes produced by the measurement models are
/// supported; anything else is reported as a numerical error.
pub fn invert_innovation(s: &Array2<f64>) -> Result<Array2<f64>> {
    match s.dim() {
        (1, 1) => {
            let value = s[[0, 0]];
            if !value.is_finite() || value.abs() < SINGULAR_EPSILON {
                return Err(NavError::Numerical(format!(
                    "singular 1x1 innovation covariance ({value:e})"
                )));
            }
            Ok(Array2::from_elem((1, 1), 1.0 / value))
        }
        (3, 3) => invert_3x3(s),
        other => Err(NavError::Numerical(format!(
            "unsupported innovation covariance shape {other:?}"
        ))),
    }
}

/// Largest |m[i][j] - m[j][i]| over the matrix.
pub fn max_asymmetry(m: &Array2<f64>) -> f64 {
    let (rows, cols) = m.dim();
    let mut worst: f64 = 0.0;
    for i in 0..rows {
        for j in (i + 1)..cols.min(rows) {
            worst = worst.max((m[[i, j]] - m[[j, i]]).abs());
        }
    }
    worst
}
