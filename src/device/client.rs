use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use anyhow::Result;
use tokio::time::Instant;
use crate::core::{DeviceAddr, Frame};
use super::transport::{self, ControlCommand, ControlTransport, RemoteEvent, TransportError};
use super::HttpTransport;

/// Controller-side handle on one remote device.
///
/// Every operation reports its own outcome and additionally raises a sticky
/// failure flag that stays set until [`DeviceClient::take_failure`] reads it,
/// so a coordinator can fan an operation out to many devices and inspect the
/// casualties afterwards.
pub struct DeviceClient {
    addr: DeviceAddr,
    transport: Box<dyn ControlTransport>,
    alive: bool,
    failed: bool,
    channels: Vec<String>,
    scale_factor: Option<f64>,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    clock: Duration,
    buffer: Vec<Frame>,
}

impl DeviceClient {
    pub fn new(addr: DeviceAddr, transport: Box<dyn ControlTransport>) -> Self {
        Self {
            addr,
            transport,
            alive: true,
            failed: false,
            channels: Vec::new(),
            scale_factor: None,
            started_at: None,
            stopped_at: None,
            clock: Duration::ZERO,
            buffer: Vec::new(),
        }
    }

    /// Client speaking the HTTP control protocol
    pub fn http(addr: DeviceAddr, timeout: Duration) -> Result<Self> {
        Ok(Self::new(addr, Box::new(HttpTransport::new(addr, timeout)?)))
    }

    pub fn addr(&self) -> DeviceAddr {
        self.addr
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Calibrated ratio of remote to local elapsed time, if any round succeeded
    pub fn scale_factor(&self) -> Option<f64> {
        self.scale_factor
    }

    pub fn set_scale_factor(&mut self, scale_factor: f64) {
        self.scale_factor = Some(scale_factor);
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn stopped_at(&self) -> Option<Instant> {
        self.stopped_at
    }

    /// Current value of the logical sample clock
    pub fn clock(&self) -> Duration {
        self.clock
    }

    /// Read and clear the sticky failure flag
    pub fn take_failure(&mut self) -> bool {
        std::mem::take(&mut self.failed)
    }

    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    /// Frames sampled since the last call, oldest first
    pub fn take_frames(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.buffer)
    }

    pub async fn ping(&mut self) -> bool {
        self.alive = match self.transport.ping().await {
            Ok(()) => true,
            Err(e) => {
                log::debug!("Ping to {} failed: {}", self.addr, e);
                false
            }
        };
        self.alive
    }

    pub async fn fetch_config(&mut self) -> Result<(), TransportError> {
        let result = self
            .transport
            .fetch_config()
            .await
            .and_then(|config| transport::channels_from_config(&config));

        match result {
            Ok(channels) => {
                log::debug!("Device {} exposes channels {:?}", self.addr, channels);
                self.channels = channels;
                Ok(())
            }
            Err(e) => self.fail("fetch config", e),
        }
    }

    pub async fn start(&mut self) -> Result<(), TransportError> {
        match self.transport.control(ControlCommand::Start).await {
            Ok(()) => {
                self.started_at = Some(Instant::now());
                Ok(())
            }
            Err(e) => self.fail("start", e),
        }
    }

    pub async fn stop(&mut self) -> Result<(), TransportError> {
        match self.transport.control(ControlCommand::Stop).await {
            Ok(()) => {
                self.stopped_at = Some(Instant::now());
                Ok(())
            }
            Err(e) => self.fail("stop", e),
        }
    }

    /// Clear local state unconditionally, then ask the device to clear its own
    pub async fn reset(&mut self) -> Result<(), TransportError> {
        self.buffer.clear();
        self.clock = Duration::ZERO;
        self.started_at = None;
        self.stopped_at = None;

        match self.transport.control(ControlCommand::Clear).await {
            Ok(()) => Ok(()),
            Err(e) => self.fail("clear", e),
        }
    }

    /// Remote event log of the latest window, `None` when the device cannot be reached
    pub async fn read_remote_timeline(&mut self) -> Option<Vec<RemoteEvent>> {
        match self.transport.fetch_timeline().await {
            Ok(events) => Some(events),
            Err(e) => {
                log::debug!("Timeline of {} unavailable: {}", self.addr, e);
                None
            }
        }
    }

    /// Sample every configured channel once.
    ///
    /// A failed read still yields a frame, flagged as missing, and the logical
    /// clock advances by `interval` either way.
    pub async fn sample_once(&mut self, interval: Duration) -> bool {
        let result = self
            .transport
            .fetch_values(&self.channels)
            .await
            .and_then(|response| transport::values_from_buffer(&response, &self.channels));

        let sampled = match result {
            Ok(values) => {
                self.buffer.push(Frame::new(self.addr, self.clock, values));
                true
            }
            Err(e) => {
                log::debug!("Sample from {} lost: {}", self.addr, e);
                self.failed = true;
                self.buffer.push(Frame::missing(self.addr, self.clock));
                false
            }
        };
        self.clock += interval;
        sampled
    }

    /// Read arbitrary channels outside of the sampling loop
    pub async fn read_channels(&mut self, channels: &[String]) -> Result<BTreeMap<String, f64>, TransportError> {
        let result = self
            .transport
            .fetch_values(channels)
            .await
            .and_then(|response| transport::values_from_buffer(&response, channels));

        match result {
            Ok(values) => Ok(values),
            Err(e) => self.fail("read channels", e),
        }
    }

    fn fail<T>(&mut self, operation: &str, err: TransportError) -> Result<T, TransportError> {
        log::warn!("Device {}: {} failed: {}", self.addr, operation, err);
        self.failed = true;
        Err(err)
    }
}

impl fmt::Debug for DeviceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceClient")
            .field("addr", &self.addr)
            .field("alive", &self.alive)
            .field("failed", &self.failed)
            .field("channels", &self.channels)
            .field("scale_factor", &self.scale_factor)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
