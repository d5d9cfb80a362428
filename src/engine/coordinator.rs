use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use crossbeam_channel::Sender;
use tokio::time::{sleep, Instant};
use crate::calibration::{CalibrationReport, ClockCalibrator};
use crate::core::ExperimentError;
use crate::device::DeviceClient;
use crate::observability::{PipelineMetrics, StatusMonitor, StatusSnapshot};
use super::broadcaster::Broadcaster;
use super::fanout::join_devices;
use super::producer::{sampling_wait, ControlMessage, ProducerHandle, SamplingProducer};
use super::session::Session;

/// Upper bound on the pause between two drain progress checks
const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Totals of a finished run
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentSummary {
    pub devices: usize,
    pub frames_emitted: u64,
    pub missing_frames: u64,
    pub packets_sent: u64,
    pub send_errors: u64,
    pub elapsed: Duration,

    /// False when the drain timeout expired with frames still queued
    pub drained: bool,
}

/// Drives a session through preflight, calibration and a sampling run.
///
/// Every checkpoint fans the same operation out to all devices and then
/// gathers the sticky failure flags; any casualty aborts the workflow.
pub struct ExperimentCoordinator {
    session: Session,
}

impl ExperimentCoordinator {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    /// Fetch every device's configuration; nothing is started here
    pub async fn preflight(&mut self) -> Result<(), ExperimentError> {
        if self.session.is_empty() {
            return Err(ExperimentError::NoDevices);
        }

        self.session.collect_failures();
        join_devices(self.session.devices_mut(), |device| device.fetch_config()).await;

        let failed = self.session.collect_failures();
        if !failed.is_empty() {
            return Err(ExperimentError::PreflightFailed(failed));
        }

        log::info!("Preflight passed for {} device(s)", self.session.len());
        Ok(())
    }

    /// Standard calibration pass
    pub async fn calibrate(&mut self) -> Result<CalibrationReport, ExperimentError> {
        let calibrator = ClockCalibrator::new(self.session.config().calibration.clone());
        self.run_calibration(calibrator).await
    }

    /// Repeat the averaging with `extended_rounds` for a tighter estimate
    pub async fn calibrate_extended(&mut self) -> Result<CalibrationReport, ExperimentError> {
        let mut config = self.session.config().calibration.clone();
        config.rounds = config.extended_rounds;
        self.run_calibration(ClockCalibrator::new(config)).await
    }

    async fn run_calibration(&mut self, calibrator: ClockCalibrator) -> Result<CalibrationReport, ExperimentError> {
        if self.session.is_empty() {
            return Err(ExperimentError::NoDevices);
        }

        let report = calibrator.calibrate(self.session.devices_mut()).await?;

        let mut failed = self.session.collect_failures();
        failed.extend(report.uncalibrated());
        failed.sort();
        failed.dedup();
        if !failed.is_empty() {
            return Err(ExperimentError::CalibrationFailed(failed));
        }

        for device in &report.devices {
            if let Some(scale) = device.scale_factor {
                log::info!(
                    "Device {} scale factor {:.6} ({} rounds)",
                    device.addr,
                    scale,
                    device.samples.len()
                );
            }
        }
        Ok(report)
    }

    /// Start the broadcaster and an isolated sampling producer.
    ///
    /// The devices move into the producer until [`ExperimentCoordinator::finish`]
    /// hands them back to the session.
    pub fn launch(&mut self) -> Result<RunningExperiment, ExperimentError> {
        if self.session.is_empty() {
            return Err(ExperimentError::NoDevices);
        }
        let config = self.session.config().clone();
        if let Some((addr, _)) = self
            .session
            .scale_factors()
            .into_iter()
            .find(|(_, scale)| sampling_wait(config.frame_interval(), *scale).is_none())
        {
            return Err(ExperimentError::Uncalibrated(addr));
        }

        let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
        let (control_tx, control_rx) = crossbeam_channel::bounded(1);
        let running = Arc::new(AtomicBool::new(true));
        let metrics = Arc::new(PipelineMetrics::new());

        let broadcaster = Broadcaster::bind(
            config.broadcast_addr,
            frame_rx.clone(),
            running.clone(),
            metrics.clone(),
        )?;

        let devices = self.session.take_devices();
        let device_count = devices.len();
        let producer = SamplingProducer::new(
            devices,
            config.frame_interval(),
            config.calibration.settle_delay(),
            frame_tx,
            control_rx,
        )?;

        let broadcaster = broadcaster.spawn()?;
        let producer = producer.spawn_isolated()?;

        log::info!(
            "Experiment running with {} device(s) at {} frames/s",
            device_count,
            config.frame_rate
        );

        Ok(RunningExperiment {
            producer,
            broadcaster,
            control: control_tx,
            running,
            monitor: StatusMonitor::new(metrics, frame_rx, device_count),
            status_refresh: config.status_refresh(),
            drain_timeout: config.drain_timeout(),
        })
    }

    /// Stop a launched experiment, wait for the queue to drain and put the
    /// devices back into the session, also when sampling failed
    pub async fn finish<F>(
        &mut self,
        experiment: RunningExperiment,
        on_status: &mut F,
    ) -> Result<ExperimentSummary, ExperimentError>
    where
        F: FnMut(&StatusSnapshot),
    {
        let (outcome, mut devices) = experiment.stop_and_drain(on_status).await;

        for device in devices.iter_mut() {
            if device.take_failure() {
                log::warn!("Device {} lost samples during the run", device.addr());
            }
        }
        self.session.restore_devices(devices);
        outcome
    }

    /// Full workflow: preflight, calibration, sampling until `stop` resolves
    pub async fn run<S, F>(
        &mut self,
        extended_calibration: bool,
        stop: S,
        mut on_status: F,
    ) -> Result<ExperimentSummary, ExperimentError>
    where
        S: Future<Output = ()>,
        F: FnMut(&StatusSnapshot),
    {
        self.preflight().await?;
        self.calibrate().await?;
        if extended_calibration {
            self.calibrate_extended().await?;
        }

        let experiment = self.launch()?;
        experiment.wait_for_stop(stop, &mut on_status).await;
        self.finish(experiment, &mut on_status).await
    }
}

/// Handles on a launched experiment
pub struct RunningExperiment {
    producer: ProducerHandle,
    broadcaster: thread::JoinHandle<()>,
    control: Sender<ControlMessage>,
    running: Arc<AtomicBool>,
    monitor: StatusMonitor,
    status_refresh: Duration,
    drain_timeout: Duration,
}

impl RunningExperiment {
    pub fn status(&self) -> StatusSnapshot {
        self.monitor.snapshot()
    }

    pub fn producer_finished(&self) -> bool {
        self.producer.is_finished()
    }

    /// Report status every refresh period until `stop` resolves or the
    /// producer exits on its own
    pub async fn wait_for_stop<S, F>(&self, stop: S, on_status: &mut F)
    where
        S: Future<Output = ()>,
        F: FnMut(&StatusSnapshot),
    {
        tokio::pin!(stop);
        let mut ticker = tokio::time::interval(self.status_refresh);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {
                    on_status(&self.status());
                    if self.producer_finished() {
                        log::warn!("Sampling producer exited before stop was requested");
                        break;
                    }
                }
            }
        }
    }

    pub(crate) async fn stop_and_drain<F>(
        self,
        on_status: &mut F,
    ) -> (Result<ExperimentSummary, ExperimentError>, Vec<DeviceClient>)
    where
        F: FnMut(&StatusSnapshot),
    {
        let RunningExperiment {
            producer,
            broadcaster,
            control,
            running,
            monitor,
            status_refresh,
            drain_timeout,
        } = self;

        // Full or disconnected both mean the producer is already on its way out
        let _ = control.try_send(ControlMessage::Stop);

        let join = tokio::task::spawn_blocking(move || producer.join());
        tokio::pin!(join);
        let mut ticker = tokio::time::interval(status_refresh);
        let produced = loop {
            tokio::select! {
                result = &mut join => break result,
                _ = ticker.tick() => on_status(&monitor.snapshot()),
            }
        };
        let produced = match produced {
            Ok(result) => result,
            Err(e) => Err(ExperimentError::ProducerFailed(format!("join failed: {}", e))),
        };

        running.store(false, Ordering::Release);

        let deadline = Instant::now() + drain_timeout;
        let mut drained = true;
        while monitor.queue_depth() > 0 {
            if Instant::now() >= deadline {
                log::warn!(
                    "Drain timeout expired with {} frame(s) still queued",
                    monitor.queue_depth()
                );
                drained = false;
                break;
            }
            on_status(&monitor.snapshot());
            sleep(status_refresh.min(DRAIN_POLL)).await;
        }

        if drained {
            match tokio::task::spawn_blocking(move || broadcaster.join()).await {
                Ok(Ok(())) => {}
                _ => log::error!("Broadcaster thread panicked"),
            }
        }
        on_status(&monitor.snapshot());

        let report = match produced {
            Ok(report) => report,
            Err(e) => return (Err(e), Vec::new()),
        };
        if let Some(failure) = report.failure {
            return (Err(ExperimentError::ProducerFailed(failure)), report.devices);
        }

        let metrics = monitor.metrics();
        let summary = ExperimentSummary {
            devices: report.devices.len(),
            frames_emitted: report.frames_emitted,
            missing_frames: report.missing_frames,
            packets_sent: metrics.packets_sent(),
            send_errors: metrics.send_errors(),
            elapsed: monitor.elapsed(),
            drained,
        };

        log::info!(
            "Experiment finished: {} frames, {} missing, {} packets sent in {:.1}s",
            summary.frames_emitted,
            summary.missing_frames,
            summary.packets_sent,
            summary.elapsed.as_secs_f64()
        );

        (Ok(summary), report.devices)
    }
}
