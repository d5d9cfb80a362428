use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use crate::core::Frame;
use crate::observability::PipelineMetrics;

/// How long one blocking pop waits before re-checking the running flag
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Relays frames from the output channel to a local datagram endpoint.
///
/// The loop keeps going while the experiment is running or frames remain
/// queued, so everything enqueued before stop is delivered. It also ends once
/// the queue is empty and every producer-side sender is gone.
pub struct Broadcaster {
    socket: UdpSocket,
    target: SocketAddr,
    frames: Receiver<Frame>,
    running: Arc<AtomicBool>,
    metrics: Arc<PipelineMetrics>,
}

impl Broadcaster {
    pub fn bind(
        target: SocketAddr,
        frames: Receiver<Frame>,
        running: Arc<AtomicBool>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .context("Failed to bind broadcast socket")?;

        log::info!("Broadcasting frames to {}", target);

        Ok(Self {
            socket,
            target,
            frames,
            running,
            metrics,
        })
    }

    pub fn run(self) {
        loop {
            if !self.running.load(Ordering::Acquire) && self.frames.is_empty() {
                break;
            }

            match self.frames.recv_timeout(POLL_INTERVAL) {
                Ok(frame) => self.send(&frame),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    if self.running.load(Ordering::Acquire) {
                        log::warn!("Output channel closed while the experiment was running");
                    }
                    break;
                }
            }
        }

        log::info!("Broadcaster drained, {} packets sent", self.metrics.packets_sent());
    }

    pub fn spawn(self) -> Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("broadcaster".to_string())
            .spawn(move || self.run())
            .context("Failed to spawn broadcaster thread")
    }

    fn send(&self, frame: &Frame) {
        if frame.is_missing() {
            self.metrics.record_missing_frame();
        }

        let datagram = match frame.to_datagram() {
            Ok(datagram) => datagram,
            Err(e) => {
                log::warn!("Failed to serialize frame from {}: {}", frame.device, e);
                self.metrics.record_send_error();
                return;
            }
        };

        match self.socket.send_to(&datagram, self.target) {
            Ok(_) => self.metrics.record_packet_sent(),
            Err(e) => {
                log::warn!("Failed to send frame to {}: {}", self.target, e);
                self.metrics.record_send_error();
            }
        }
    }
}
