use std::sync::atomic::{AtomicU64, Ordering};

/// Throughput counters of the broadcast side of the pipeline
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    packets_sent: AtomicU64,
    send_errors: AtomicU64,
    missing_frames: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors.load(Ordering::Relaxed)
    }

    /// Relayed frames that carried the missing-data marker
    pub fn missing_frames(&self) -> u64 {
        self.missing_frames.load(Ordering::Relaxed)
    }

    pub fn record_packet_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missing_frame(&self) {
        self.missing_frames.fetch_add(1, Ordering::Relaxed);
    }
}
