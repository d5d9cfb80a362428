use std::collections::BTreeMap;
use std::time::Duration;
use serde::{Serialize, Deserialize};
use super::DeviceAddr;

/// One sample captured from one device
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Device that produced the sample
    pub device: DeviceAddr,

    /// Value of the device's logical sample clock at capture
    pub timestamp: Duration,

    /// Channel values keyed by channel name, `None` when the sample was lost
    pub payload: Option<BTreeMap<String, f64>>,
}

impl Frame {
    pub fn new(device: DeviceAddr, timestamp: Duration, payload: BTreeMap<String, f64>) -> Self {
        Self {
            device,
            timestamp,
            payload: Some(payload),
        }
    }

    /// Frame standing in for a sample that could not be read
    pub fn missing(device: DeviceAddr, timestamp: Duration) -> Self {
        Self {
            device,
            timestamp,
            payload: None,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.payload.is_none()
    }

    pub fn to_wire(&self) -> WireFrame {
        WireFrame {
            time: self.timestamp.as_secs_f64(),
            data: self.payload.clone(),
        }
    }

    /// Serialize as a single datagram: `{"<device>": {"time": t, "data": {...} | null}}`
    pub fn to_datagram(&self) -> serde_json::Result<Vec<u8>> {
        let mut message = BroadcastMessage::new();
        message.insert(self.device.to_string(), self.to_wire());
        serde_json::to_vec(&message)
    }
}

/// On-the-wire representation of a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    /// Logical timestamp in seconds
    pub time: f64,

    /// Channel values, serialized as `null` for a lost sample
    pub data: Option<BTreeMap<String, f64>>,
}

/// One broadcast datagram, keyed by device identity
pub type BroadcastMessage = BTreeMap<String, WireFrame>;

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> DeviceAddr {
        "192.168.1.20:8080".parse().unwrap()
    }

    #[test]
    fn test_datagram_layout() {
        let mut payload = BTreeMap::new();
        payload.insert("accX".to_string(), 0.5);
        let frame = Frame::new(device(), Duration::from_millis(40), payload);

        let value: serde_json::Value = serde_json::from_slice(&frame.to_datagram().unwrap()).unwrap();
        assert_eq!(value["192.168.1.20:8080"]["time"], 0.04);
        assert_eq!(value["192.168.1.20:8080"]["data"]["accX"], 0.5);
    }

    #[test]
    fn test_missing_frame_serializes_null() {
        let frame = Frame::missing(device(), Duration::from_secs(1));
        assert!(frame.is_missing());

        let value: serde_json::Value = serde_json::from_slice(&frame.to_datagram().unwrap()).unwrap();
        assert!(value["192.168.1.20:8080"]["data"].is_null());
        assert_eq!(value["192.168.1.20:8080"]["time"], 1.0);
    }
}
