use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use anyhow::{bail, Context, Result};
use serde::{Serialize, Deserialize};
use serde_json::Value;

/// Default control port exposed by devices
pub const DEFAULT_DEVICE_PORT: u16 = 8080;

/// Default local port the broadcaster relays frames to
pub const DEFAULT_BROADCAST_PORT: u16 = 6060;

/// Experiment-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Port assumed for devices given without one
    pub device_port: u16,

    /// Destination of the broadcast datagrams
    pub broadcast_addr: SocketAddr,

    /// Target sampling rate per device, in frames per second
    pub frame_rate: f64,

    /// Timeout applied to every device request
    pub request_timeout_ms: u64,

    /// Refresh period of the live status snapshot
    pub status_refresh_ms: u64,

    /// Upper bound on waiting for the output queue to drain after stop
    pub drain_timeout_ms: u64,

    pub calibration: CalibrationConfig,
}

/// Clock calibration protocol settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Rounds averaged per calibration pass
    pub rounds: usize,

    /// Rounds of the optional extended pass
    pub extended_rounds: usize,

    /// Time the devices are left running during one window
    pub observation_ms: u64,

    /// Initial wait between stop and reading the remote timeline
    pub settle_delay_ms: u64,

    /// Request latency subtracted from every local measurement
    pub inter_request_delay_ms: u64,

    /// Added to the settle delay each time a pass is rejected
    pub settle_increment_ms: u64,

    /// Rejected passes tolerated before calibration gives up
    pub max_retries: u32,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            device_port: DEFAULT_DEVICE_PORT,
            broadcast_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_BROADCAST_PORT)),
            frame_rate: 25.0,
            request_timeout_ms: 500,
            status_refresh_ms: 250,
            drain_timeout_ms: 10_000,
            calibration: CalibrationConfig::default(),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            rounds: 5,
            extended_rounds: 10,
            observation_ms: 2_000,
            settle_delay_ms: 10,
            inter_request_delay_ms: 10,
            settle_increment_ms: 10,
            max_retries: 8,
        }
    }
}

impl ExperimentConfig {
    pub fn from_json(config: Value) -> Result<Self> {
        let config: Self = serde_json::from_value(config)
            .context("Failed to parse experiment configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .context(format!("Failed to read configuration from {:?}", path))?;
        let value: Value = serde_json::from_str(&json)
            .context(format!("Configuration at {:?} is not valid JSON", path))?;
        Self::from_json(value)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            bail!("frame_rate must be a positive number, got {}", self.frame_rate);
        }
        if self.request_timeout_ms == 0 {
            bail!("request_timeout_ms must be greater than zero");
        }
        if self.status_refresh_ms == 0 {
            bail!("status_refresh_ms must be greater than zero");
        }
        self.calibration.validate()
    }

    /// Sampling period in remote (device) time
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.frame_rate)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn status_refresh(&self) -> Duration {
        Duration::from_millis(self.status_refresh_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rounds == 0 || self.extended_rounds == 0 {
            bail!("calibration.rounds and calibration.extended_rounds must be at least 1");
        }
        if self.observation_ms == 0 {
            bail!("calibration.observation_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn observation_window(&self) -> Duration {
        Duration::from_millis(self.observation_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_millis(self.inter_request_delay_ms)
    }

    pub fn settle_increment(&self) -> Duration {
        Duration::from_millis(self.settle_increment_ms)
    }
}
