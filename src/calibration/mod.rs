pub mod calibrator;
pub mod policy;
pub mod window;

pub use calibrator::{CalibrationReport, ClockCalibrator, DeviceCalibration};
pub use policy::{BackoffPolicy, PassVerdict};
pub use window::{CalibrationWindow, WindowError};
