pub mod position_ekf;

pub use position_ekf::{CovarianceUpdate, EkfConfig, PositionEkf};
