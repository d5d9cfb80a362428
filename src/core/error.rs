use thiserror::Error;
use super::DeviceAddr;

/// Checkpoint failures surfaced by the experiment workflow
#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("No devices paired")]
    NoDevices,

    #[error("Preflight failed for device(s) {}", join_addrs(.0))]
    PreflightFailed(Vec<DeviceAddr>),

    #[error("Calibration failed for device(s) {}", join_addrs(.0))]
    CalibrationFailed(Vec<DeviceAddr>),

    #[error("Calibration did not converge after {retries} retries ({failures} of {windows} windows failed)")]
    CalibrationDiverged {
        retries: u32,
        failures: usize,
        windows: usize,
    },

    #[error("Device {0} has no calibrated scale factor")]
    Uncalibrated(DeviceAddr),

    #[error("Sampling producer failed: {0}")]
    ProducerFailed(String),

    #[error("Experiment setup failed: {0}")]
    Setup(#[from] anyhow::Error),
}

impl ExperimentError {
    /// Devices named by a checkpoint failure
    pub fn devices(&self) -> &[DeviceAddr] {
        match self {
            Self::PreflightFailed(devices) | Self::CalibrationFailed(devices) => devices,
            Self::Uncalibrated(device) => std::slice::from_ref(device),
            _ => &[],
        }
    }
}

fn join_addrs(addrs: &[DeviceAddr]) -> String {
    addrs
        .iter()
        .map(|addr| addr.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
