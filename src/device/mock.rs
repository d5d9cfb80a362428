use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;
use crate::core::DeviceAddr;
use super::transport::{ControlCommand, ControlTransport, RemoteEvent, RemoteEventKind, TransportError};
use super::DeviceClient;

/// In-memory device whose experiment clock runs `drift` times faster than
/// the controller's.
///
/// Clones share state, so a test can keep one handle to inject failures and
/// inspect issued commands while a [`DeviceClient`] drives another.
#[derive(Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimulatedState>>,
}

struct SimulatedState {
    drift: f64,
    reachable: bool,
    failing_status: Option<u16>,
    publish_latency: Duration,
    timeline_available: bool,
    panic_on_sample: bool,
    channels: Vec<String>,
    running_since: Option<Instant>,
    stopped_at: Option<Instant>,
    experiment_time: f64,
    events: Vec<RemoteEvent>,
    commands: Vec<ControlCommand>,
    samples_served: u64,
}

impl SimulatedDevice {
    pub fn new(drift: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimulatedState {
                drift,
                reachable: true,
                failing_status: None,
                publish_latency: Duration::ZERO,
                timeline_available: true,
                panic_on_sample: false,
                channels: vec!["accX".to_string(), "accY".to_string(), "accZ".to_string()],
                running_since: None,
                stopped_at: None,
                experiment_time: 0.0,
                events: Vec::new(),
                commands: Vec::new(),
                samples_served: 0,
            })),
        }
    }

    /// Wrap a clone of this device in a client
    pub fn client(&self, addr: DeviceAddr) -> DeviceClient {
        DeviceClient::new(addr, Box::new(self.clone()))
    }

    /// Simulate the device dropping off (or rejoining) the network
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Answer every request with this HTTP status instead of 200
    pub fn set_failing_status(&self, status: Option<u16>) {
        self.lock().failing_status = status;
    }

    /// Delay between a stop and the matching PAUSE event appearing in `/time`
    pub fn set_publish_latency(&self, latency: Duration) {
        self.lock().publish_latency = latency;
    }

    /// Fail only `/time` requests while every other endpoint keeps answering
    pub fn set_timeline_available(&self, available: bool) {
        self.lock().timeline_available = available;
    }

    /// Panic inside every value read, like a faulty driver would
    pub fn set_panic_on_sample(&self, panic: bool) {
        self.lock().panic_on_sample = panic;
    }

    /// Control commands received so far, in order
    pub fn commands(&self) -> Vec<ControlCommand> {
        self.lock().commands.clone()
    }

    pub fn samples_served(&self) -> u64 {
        self.lock().samples_served
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self) -> Result<MutexGuard<'_, SimulatedState>, TransportError> {
        let state = self.lock();
        if !state.reachable {
            return Err(TransportError::Unreachable("connection refused".to_string()));
        }
        if let Some(status) = state.failing_status {
            return Err(TransportError::Status(status));
        }
        Ok(state)
    }
}

impl SimulatedState {
    fn current_experiment_time(&self, now: Instant) -> f64 {
        match self.running_since {
            Some(since) => self.experiment_time + now.duration_since(since).as_secs_f64() * self.drift,
            None => self.experiment_time,
        }
    }
}

#[async_trait]
impl ControlTransport for SimulatedDevice {
    async fn ping(&self) -> Result<(), TransportError> {
        self.check().map(|_| ())
    }

    async fn fetch_config(&self) -> Result<Value, TransportError> {
        let state = self.check()?;
        let outputs: Vec<Value> = state
            .channels
            .iter()
            .enumerate()
            .map(|(i, channel)| {
                let mut output = serde_json::Map::new();
                output.insert(format!("out{}", i), Value::from(channel.as_str()));
                Value::Object(output)
            })
            .collect();
        Ok(json!({
            "crc32": "6a4f1f6e",
            "title": "Simulated sensor",
            "inputs": [{ "source": "accelerometer", "outputs": outputs }]
        }))
    }

    async fn control(&self, command: ControlCommand) -> Result<(), TransportError> {
        let mut state = self.check()?;
        let now = Instant::now();
        state.commands.push(command);

        match command {
            ControlCommand::Start => {
                if state.running_since.is_none() {
                    let t = state.experiment_time;
                    state.events.push(RemoteEvent::new(RemoteEventKind::Start, t));
                    state.running_since = Some(now);
                }
            }
            ControlCommand::Stop => {
                if state.running_since.is_some() {
                    let t = state.current_experiment_time(now);
                    state.experiment_time = t;
                    state.events.push(RemoteEvent::new(RemoteEventKind::Pause, t));
                    state.running_since = None;
                    state.stopped_at = Some(now);
                }
            }
            ControlCommand::Clear => {
                state.running_since = None;
                state.stopped_at = None;
                state.experiment_time = 0.0;
                state.events.clear();
            }
        }
        Ok(())
    }

    async fn fetch_timeline(&self) -> Result<Vec<RemoteEvent>, TransportError> {
        let state = self.check()?;
        if !state.timeline_available {
            return Err(TransportError::Status(404));
        }
        let published = state
            .stopped_at
            .map_or(true, |stopped| stopped.elapsed() >= state.publish_latency);

        Ok(state
            .events
            .iter()
            .filter(|event| published || event.event != RemoteEventKind::Pause)
            .cloned()
            .collect())
    }

    async fn fetch_values(&self, channels: &[String]) -> Result<Value, TransportError> {
        let mut state = self.check()?;
        if state.panic_on_sample {
            drop(state);
            panic!("simulated driver fault");
        }
        state.samples_served += 1;
        let t = state.current_experiment_time(Instant::now());

        let mut buffer = serde_json::Map::new();
        for (i, channel) in channels.iter().enumerate() {
            let value = (t + i as f64).sin();
            buffer.insert(channel.clone(), json!({ "size": 0, "updateMode": "single", "buffer": [value] }));
        }
        Ok(json!({ "buffer": buffer, "status": { "measuring": state.running_since.is_some() } }))
    }
}
