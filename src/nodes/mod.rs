//! Process-level composition of the fabric, the decoder and the filter.

pub mod gps;
pub mod position;

pub use gps::GpsNode;
pub use position::{PositionEstimator, PositionNode, SensorEvent};
