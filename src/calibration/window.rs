use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use crate::device::{RemoteEvent, RemoteEventKind};

/// Reasons a calibration window cannot produce a scale factor
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WindowError {
    #[error("Remote timeline has {0} event(s), need at least 2")]
    TooFewEvents(usize),

    #[error("Remote timeline has no {0} event")]
    MissingEvent(&'static str),

    #[error("Local start or stop timestamp missing")]
    MissingLocalTimestamp,

    #[error("Non-positive elapsed time (remote {remote:.6}s, local {local:.6}s)")]
    NonPositiveDelta { remote: f64, local: f64 },
}

/// One start/stop measurement of a device against the local clock
#[derive(Debug, Clone)]
pub struct CalibrationWindow {
    pub local_start: Instant,
    pub local_stop: Instant,

    /// Latency of one request, charged once against the local measurement
    pub inter_request_delay: Duration,

    pub events: Vec<RemoteEvent>,
}

impl CalibrationWindow {
    pub fn new(
        local_start: Instant,
        local_stop: Instant,
        inter_request_delay: Duration,
        events: Vec<RemoteEvent>,
    ) -> Self {
        Self {
            local_start,
            local_stop,
            inter_request_delay,
            events,
        }
    }

    /// Elapsed local seconds, corrected for request latency
    pub fn local_delta(&self) -> f64 {
        self.local_stop.duration_since(self.local_start).as_secs_f64()
            - self.inter_request_delay.as_secs_f64()
    }

    /// Elapsed remote seconds between the last START and the last PAUSE
    pub fn remote_delta(&self) -> Result<f64, WindowError> {
        if self.events.len() < 2 {
            return Err(WindowError::TooFewEvents(self.events.len()));
        }
        let last_time = |kind: RemoteEventKind| {
            self.events
                .iter()
                .rev()
                .find(|event| event.event == kind)
                .map(|event| event.experiment_time)
        };
        let start = last_time(RemoteEventKind::Start).ok_or(WindowError::MissingEvent("START"))?;
        let pause = last_time(RemoteEventKind::Pause).ok_or(WindowError::MissingEvent("PAUSE"))?;
        Ok(pause - start)
    }

    /// Ratio of remote to local elapsed time
    pub fn scale_factor(&self) -> Result<f64, WindowError> {
        let remote = self.remote_delta()?;
        let local = self.local_delta();
        if remote <= 0.0 || local <= 0.0 {
            return Err(WindowError::NonPositiveDelta { remote, local });
        }
        Ok(remote / local)
    }
}

/// Arithmetic mean, `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
