pub mod address;
pub mod config;
pub mod error;
pub mod frame;

pub use address::DeviceAddr;
pub use config::{CalibrationConfig, ExperimentConfig};
pub use error::ExperimentError;
pub use frame::{BroadcastMessage, Frame, WireFrame};
