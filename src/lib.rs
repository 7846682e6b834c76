//! AUV navigation core: pub/sub fabric, NMEA decoding and EKF position
//! estimation.

pub mod config;
pub mod error;
pub mod fabric;
pub mod filters;
pub mod geodesy;
pub mod nmea;
pub mod nodes;
pub mod types;

pub use config::{NavigationConfig, NodeConfig};
pub use error::{NavError, Result};
