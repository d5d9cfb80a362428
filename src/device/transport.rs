use std::collections::BTreeMap;
use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use thiserror::Error;

/// Failure of a single device request
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Remote experiment commands accepted by `/control`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    Clear,
}

impl ControlCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Clear => "clear",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemoteEventKind {
    Start,
    Pause,
    Other(String),
}

impl From<String> for RemoteEventKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "START" => Self::Start,
            "PAUSE" => Self::Pause,
            _ => Self::Other(name),
        }
    }
}

impl From<RemoteEventKind> for String {
    fn from(kind: RemoteEventKind) -> Self {
        match kind {
            RemoteEventKind::Start => "START".to_string(),
            RemoteEventKind::Pause => "PAUSE".to_string(),
            RemoteEventKind::Other(name) => name,
        }
    }
}

/// Entry of the remote experiment timeline served by `/time`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub event: RemoteEventKind,

    /// Remote experiment clock in seconds
    #[serde(rename = "experimentTime")]
    pub experiment_time: f64,
}

impl RemoteEvent {
    pub fn new(event: RemoteEventKind, experiment_time: f64) -> Self {
        Self { event, experiment_time }
    }
}

/// Request/response access to one device's control protocol
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Liveness probe on the root endpoint
    async fn ping(&self) -> Result<(), TransportError>;

    /// Raw channel descriptor from `/config`
    async fn fetch_config(&self) -> Result<Value, TransportError>;

    async fn control(&self, command: ControlCommand) -> Result<(), TransportError>;

    /// Event log of the latest start/stop window from `/time`
    async fn fetch_timeline(&self) -> Result<Vec<RemoteEvent>, TransportError>;

    /// Raw buffer contents for the requested channels from `/get`
    async fn fetch_values(&self, channels: &[String]) -> Result<Value, TransportError>;
}

/// Extract channel names from a `/config` descriptor.
///
/// Every input lists its outputs as `{ "<role>": "<channel>" }` objects; the
/// channel names are collected in declaration order.
pub fn channels_from_config(config: &Value) -> Result<Vec<String>, TransportError> {
    let inputs = config["inputs"]
        .as_array()
        .ok_or_else(|| TransportError::Malformed("config has no inputs".to_string()))?;

    let mut channels = Vec::new();
    for input in inputs {
        let Some(outputs) = input["outputs"].as_array() else {
            continue;
        };
        for output in outputs {
            let Some(mapping) = output.as_object() else {
                continue;
            };
            channels.extend(mapping.values().filter_map(|v| v.as_str()).map(str::to_string));
        }
    }
    Ok(channels)
}

/// Pick the latest value of each requested channel out of a `/get` response
pub fn values_from_buffer(
    response: &Value,
    channels: &[String],
) -> Result<BTreeMap<String, f64>, TransportError> {
    channels
        .iter()
        .map(|channel| {
            response["buffer"][channel.as_str()]["buffer"][0]
                .as_f64()
                .map(|value| (channel.clone(), value))
                .ok_or_else(|| TransportError::Malformed(format!("no value for channel {}", channel)))
        })
        .collect()
}
