use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::thread;
use std::time::Duration;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};
use crate::core::{ExperimentError, Frame};
use crate::device::DeviceClient;
use super::fanout::join_devices;
use super::state::ProducerState;

/// Messages from the coordinator to the sampling producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Stop,
}

/// What the producer hands back once it is done
#[derive(Debug)]
pub struct ProducerReport {
    /// Devices, returned to the coordinator in their original order
    pub devices: Vec<DeviceClient>,
    pub frames_emitted: u64,
    pub missing_frames: u64,

    /// Set when sampling ended abnormally; the devices are still returned
    pub failure: Option<String>,
}

/// Local time to wait between two samples so that the device's own clock
/// sees `frame_interval`; `None` for a missing or unusable scale factor
pub fn sampling_wait(frame_interval: Duration, scale_factor: Option<f64>) -> Option<Duration> {
    let scale = scale_factor.filter(|s| s.is_finite() && *s > 0.0)?;
    Duration::try_from_secs_f64(frame_interval.as_secs_f64() / scale).ok()
}

/// Samples every calibrated device at a shared target rate and pushes each
/// frame into the output channel as soon as it is captured.
pub struct SamplingProducer {
    devices: Vec<DeviceClient>,
    frame_interval: Duration,
    settle_delay: Duration,
    output: Sender<Frame>,
    control: Receiver<ControlMessage>,
    state: ProducerState,
}

struct DeviceRun {
    device: DeviceClient,
    frames: u64,
    missing: u64,
    panic: Option<String>,
}

impl SamplingProducer {
    /// Refuses devices without a usable scale factor
    pub fn new(
        devices: Vec<DeviceClient>,
        frame_interval: Duration,
        settle_delay: Duration,
        output: Sender<Frame>,
        control: Receiver<ControlMessage>,
    ) -> Result<Self, ExperimentError> {
        if let Some(device) = devices
            .iter()
            .find(|d| sampling_wait(frame_interval, d.scale_factor()).is_none())
        {
            return Err(ExperimentError::Uncalibrated(device.addr()));
        }

        Ok(Self {
            devices,
            frame_interval,
            settle_delay,
            output,
            control,
            state: ProducerState::Idle,
        })
    }

    pub fn state(&self) -> &ProducerState {
        &self.state
    }

    fn transition_to(&mut self, new_state: ProducerState) -> Result<()> {
        if !self.state.can_transition_to(&new_state) {
            return Err(anyhow!(
                "Invalid producer state transition: {} -> {}",
                self.state.name(),
                new_state.name()
            ));
        }
        log::debug!("Producer {} -> {}", self.state.name(), new_state.name());
        self.state = new_state;
        Ok(())
    }

    /// Run the whole STARTING -> RUNNING -> STOPPING -> DONE cycle.
    ///
    /// The control channel is polled once per frame interval; a stop message
    /// or a disconnected coordinator both end the run. Devices that come back
    /// from sampling are always stopped and reset, also when sampling failed.
    pub async fn run(mut self) -> ProducerReport {
        let mut report = ProducerReport {
            devices: Vec::new(),
            frames_emitted: 0,
            missing_frames: 0,
            failure: None,
        };

        if let Err(e) = self.sample(&mut report).await {
            let error_msg = format!("{:#}", e);
            log::error!("Sampling failed: {}", error_msg);
            self.state = ProducerState::Failed { error_msg: error_msg.clone() };
            report.failure = Some(error_msg);
        }

        join_devices(&mut self.devices, |device| device.stop()).await;
        sleep(self.settle_delay).await;
        join_devices(&mut self.devices, |device| device.reset()).await;

        if report.failure.is_none() {
            if let Err(e) = self.transition_to(ProducerState::Done) {
                report.failure = Some(e.to_string());
            }
        }

        log::info!(
            "Sampling finished: {} frames emitted, {} missing",
            report.frames_emitted,
            report.missing_frames
        );

        report.devices = self.devices;
        report
    }

    /// STARTING and RUNNING, up to handing the devices back for STOPPING
    async fn sample(&mut self, report: &mut ProducerReport) -> Result<()> {
        self.transition_to(ProducerState::Starting)?;
        join_devices(&mut self.devices, |device| device.start()).await;
        for device in self.devices.iter_mut() {
            if device.take_failure() {
                log::warn!("Device {} did not acknowledge start", device.addr());
            }
        }

        self.transition_to(ProducerState::Running)?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = Vec::with_capacity(self.devices.len());
        for device in self.devices.drain(..) {
            let wait = sampling_wait(self.frame_interval, device.scale_factor()).unwrap_or(self.frame_interval);
            tasks.push(tokio::spawn(sample_device(
                device,
                self.frame_interval,
                wait,
                self.output.clone(),
                stop_rx.clone(),
            )));
        }

        loop {
            sleep(self.frame_interval).await;
            match self.control.try_recv() {
                Ok(ControlMessage::Stop) => break,
                Err(TryRecvError::Empty) => continue,
                Err(TryRecvError::Disconnected) => {
                    log::warn!("Control channel closed, stopping sampling");
                    break;
                }
            }
        }

        let _ = stop_tx.send(true);

        let mut failures = Vec::new();
        for task in tasks {
            match task.await {
                Ok(run) => {
                    report.frames_emitted += run.frames;
                    report.missing_frames += run.missing;
                    if let Some(panic) = run.panic {
                        failures.push(format!("sampling of {} panicked: {}", run.device.addr(), panic));
                    }
                    self.devices.push(run.device);
                }
                Err(e) => failures.push(format!("sampling task failed: {}", e)),
            }
        }

        self.transition_to(ProducerState::Stopping)?;
        if !failures.is_empty() {
            return Err(anyhow!(failures.join("; ")));
        }
        Ok(())
    }

    /// Run on a dedicated OS thread with its own single-threaded runtime, so
    /// the sampling cadence is independent of the controller's event loop.
    pub fn spawn_isolated(self) -> Result<ProducerHandle> {
        let thread = thread::Builder::new()
            .name("sampling-producer".to_string())
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime.block_on(self.run()),
                    Err(e) => ProducerReport {
                        devices: self.devices,
                        frames_emitted: 0,
                        missing_frames: 0,
                        failure: Some(format!("failed to build sampling runtime: {}", e)),
                    },
                }
            })
            .context("Failed to spawn sampling producer thread")?;

        Ok(ProducerHandle { thread })
    }
}

/// Sample one device until told to stop, waiting `wait` of local time
/// between attempts so the device's own clock sees the target rate.
///
/// A panic while sampling ends the loop but keeps the device.
async fn sample_device(
    device: DeviceClient,
    frame_interval: Duration,
    wait: Duration,
    output: Sender<Frame>,
    mut stop: watch::Receiver<bool>,
) -> DeviceRun {
    let mut run = DeviceRun { device, frames: 0, missing: 0, panic: None };

    let sampling = sample_loop(&mut run, frame_interval, wait, &output, &mut stop);
    let outcome = AssertUnwindSafe(sampling).catch_unwind().await;
    if let Err(panic) = outcome {
        run.panic = Some(panic_message(panic.as_ref()));
    }

    run
}

async fn sample_loop(
    run: &mut DeviceRun,
    frame_interval: Duration,
    wait: Duration,
    output: &Sender<Frame>,
    stop: &mut watch::Receiver<bool>,
) {
    let mut next = Instant::now();

    while !*stop.borrow() {
        run.device.sample_once(frame_interval).await;
        for frame in run.device.take_frames() {
            if frame.is_missing() {
                run.missing += 1;
            }
            if output.send(frame).is_err() {
                log::error!("Output channel closed, {} stops sampling", run.device.addr());
                return;
            }
            run.frames += 1;
        }

        next += wait;
        let now = Instant::now();
        if next + wait < now {
            // Fell more than one period behind; resynchronize instead of bursting
            next = now;
        }

        tokio::select! {
            _ = sleep_until(next) => {}
            _ = stop.changed() => break,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Join handle of a producer running in isolation
pub struct ProducerHandle {
    thread: thread::JoinHandle<ProducerReport>,
}

impl ProducerHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Block until the producer exits. A panic of the producer thread itself
    /// is contained and reported; the devices it held are lost in that case.
    pub fn join(self) -> Result<ProducerReport, ExperimentError> {
        self.thread
            .join()
            .map_err(|_| ExperimentError::ProducerFailed("producer thread panicked".to_string()))
    }
}
