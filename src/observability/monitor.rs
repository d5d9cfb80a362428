use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use crossbeam_channel::Receiver;
use serde::Serialize;
use crate::core::Frame;
use super::PipelineMetrics;

/// Live view of a running experiment, handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub device_count: usize,
    pub packets_sent: u64,
    pub queue_depth: usize,
    pub elapsed_seconds: f64,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "devices: {} | packets sent: {} | queued: {} | elapsed: {:.1}s",
            self.device_count, self.packets_sent, self.queue_depth, self.elapsed_seconds
        )
    }
}

/// Builds status snapshots from the shared counters and the output queue
#[derive(Clone)]
pub struct StatusMonitor {
    metrics: Arc<PipelineMetrics>,
    queue: Receiver<Frame>,
    device_count: usize,
    started: Instant,
}

impl StatusMonitor {
    pub fn new(metrics: Arc<PipelineMetrics>, queue: Receiver<Frame>, device_count: usize) -> Self {
        Self {
            metrics,
            queue,
            device_count,
            started: Instant::now(),
        }
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            device_count: self.device_count,
            packets_sent: self.metrics.packets_sent(),
            queue_depth: self.queue_depth(),
            elapsed_seconds: self.elapsed().as_secs_f64(),
        }
    }
}
