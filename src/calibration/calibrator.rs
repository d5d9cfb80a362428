use std::time::Duration;
use tokio::time::sleep;
use crate::core::{CalibrationConfig, DeviceAddr, ExperimentError};
use crate::device::DeviceClient;
use crate::engine::fanout::join_devices;
use super::policy::{BackoffPolicy, PassVerdict};
use super::window::{self, CalibrationWindow, WindowError};

/// Result of measuring one device during one round
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    Measured(f64),

    /// Timeline could not be fetched; the round is skipped for this device
    Unavailable,

    /// Timeline fetched but unusable; counts against the pass
    Rejected(WindowError),
}

/// Per-device result of an accepted pass
#[derive(Debug, Clone)]
pub struct DeviceCalibration {
    pub addr: DeviceAddr,

    /// Scale factor of every successful round
    pub samples: Vec<f64>,

    /// Mean of this pass's rounds, `None` if none of them succeeded
    pub scale_factor: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub devices: Vec<DeviceCalibration>,

    /// Rejected passes before this one was accepted
    pub retries: u32,

    /// Settle delay used by the accepted pass
    pub settle_delay: Duration,

    /// Failed windows in the accepted pass
    pub failures: usize,
}

impl CalibrationReport {
    /// Devices left without a usable scale factor
    pub fn uncalibrated(&self) -> Vec<DeviceAddr> {
        self.devices
            .iter()
            .filter(|device| device.scale_factor.is_none())
            .map(|device| device.addr)
            .collect()
    }
}

struct PassResult {
    samples: Vec<Vec<f64>>,
    failures: usize,
}

/// Estimates each device's clock drift against the controller
pub struct ClockCalibrator {
    config: CalibrationConfig,
}

impl ClockCalibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Run averaging passes until the failure ratio is acceptable, then store
    /// each device's mean scale factor.
    ///
    /// Sticky failure flags are cleared before every pass, so the flags left
    /// behind describe the accepted pass only.
    pub async fn calibrate(&self, devices: &mut [DeviceClient]) -> Result<CalibrationReport, ExperimentError> {
        let mut policy = BackoffPolicy::from_config(&self.config);

        loop {
            for device in devices.iter_mut() {
                device.take_failure();
            }

            let pass = self.run_pass(devices, policy.settle_delay()).await;
            let windows = devices.len() * self.config.rounds;

            match policy.judge(pass.failures, devices.len(), self.config.rounds) {
                PassVerdict::Accepted => {
                    log::info!(
                        "Calibration pass accepted ({} of {} windows failed, settle delay {:?})",
                        pass.failures,
                        windows,
                        policy.settle_delay()
                    );
                    return Ok(self.apply(devices, pass, &policy));
                }
                PassVerdict::Retry { settle_delay } => {
                    log::warn!(
                        "Calibration pass rejected ({} of {} windows failed), retrying with settle delay {:?}",
                        pass.failures,
                        windows,
                        settle_delay
                    );
                }
                PassVerdict::GiveUp => {
                    return Err(ExperimentError::CalibrationDiverged {
                        retries: policy.retries(),
                        failures: pass.failures,
                        windows,
                    });
                }
            }
        }
    }

    async fn run_pass(&self, devices: &mut [DeviceClient], settle_delay: Duration) -> PassResult {
        let mut samples = vec![Vec::new(); devices.len()];
        let mut failures = 0;

        for round in 0..self.config.rounds {
            let observation = self.config.observation_window();
            let inter_request_delay = self.config.inter_request_delay();
            let outcomes = join_devices(devices, |device| {
                measure_window(device, observation, settle_delay, inter_request_delay)
            })
            .await;

            for (i, outcome) in outcomes.into_iter().enumerate() {
                match outcome {
                    WindowOutcome::Measured(factor) => samples[i].push(factor),
                    WindowOutcome::Unavailable => {}
                    WindowOutcome::Rejected(e) => {
                        log::debug!("Round {}: window of {} rejected: {}", round + 1, devices[i].addr(), e);
                        failures += 1;
                    }
                }
            }
        }

        PassResult { samples, failures }
    }

    fn apply(&self, devices: &mut [DeviceClient], pass: PassResult, policy: &BackoffPolicy) -> CalibrationReport {
        let results = devices
            .iter_mut()
            .zip(pass.samples)
            .map(|(device, samples)| {
                // A device without a successful round in this pass keeps its
                // previous factor but is reported as uncalibrated
                let scale_factor = window::mean(&samples);
                if let Some(factor) = scale_factor {
                    device.set_scale_factor(factor);
                }
                log::info!(
                    "{} - scale factor {:?} from {} round(s)",
                    device.addr(),
                    scale_factor,
                    samples.len()
                );
                DeviceCalibration {
                    addr: device.addr(),
                    samples,
                    scale_factor,
                }
            })
            .collect();

        CalibrationReport {
            devices: results,
            retries: policy.retries(),
            settle_delay: policy.settle_delay(),
            failures: pass.failures,
        }
    }
}

/// One calibration round against a single device:
/// reset, start, observe, stop, settle, read the remote timeline.
pub async fn measure_window(
    device: &mut DeviceClient,
    observation: Duration,
    settle_delay: Duration,
    inter_request_delay: Duration,
) -> WindowOutcome {
    let _ = device.reset().await;
    let _ = device.start().await;
    sleep(observation).await;
    let _ = device.stop().await;
    sleep(settle_delay).await;

    let Some(events) = device.read_remote_timeline().await else {
        return WindowOutcome::Unavailable;
    };

    let factor = match (device.started_at(), device.stopped_at()) {
        (Some(start), Some(stop)) => {
            let window = CalibrationWindow::new(start, stop, inter_request_delay, events);
            if let Ok(remote) = window.remote_delta() {
                log::info!("{} - remote: {:.6}s; local: {:.6}s", device.addr(), remote, window.local_delta());
            }
            window.scale_factor()
        }
        _ => Err(WindowError::MissingLocalTimestamp),
    };

    match factor {
        Ok(factor) => {
            let _ = device.reset().await;
            WindowOutcome::Measured(factor)
        }
        Err(e) => {
            device.mark_failed();
            WindowOutcome::Rejected(e)
        }
    }
}
