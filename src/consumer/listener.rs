use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use crate::core::BroadcastMessage;

/// Silence tolerated after the first datagram before the listener closes
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(5);

const READ_POLL: Duration = Duration::from_millis(100);
const MAX_DATAGRAM: usize = 65_535;

/// Datagrams shorter than this are treated as keep-alive noise
const MIN_DATAGRAM: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Frame listener closed")]
pub struct ListenerClosed;

/// Receives broadcast datagrams on a background thread and decodes them.
///
/// Once data has arrived, the listener closes itself after
/// `inactivity_timeout` without a datagram.
pub struct FrameListener {
    local_addr: SocketAddr,
    messages: Receiver<BroadcastMessage>,
    running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl FrameListener {
    pub fn bind(addr: SocketAddr, inactivity_timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(addr).context(format!("Failed to bind listener on {}", addr))?;
        socket
            .set_read_timeout(Some(READ_POLL))
            .context("Failed to set listener read timeout")?;
        let local_addr = socket.local_addr()?;

        let (tx, messages) = crossbeam_channel::unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let thread = thread::Builder::new()
            .name("frame-listener".to_string())
            .spawn(move || listen(socket, tx, flag, inactivity_timeout))
            .context("Failed to spawn listener thread")?;

        log::info!("Listening for frames on {}", local_addr);

        Ok(Self {
            local_addr,
            messages,
            running,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block until the next message; errors once the listener has closed and
    /// every received message has been handed out
    pub fn next_message(&self) -> Result<BroadcastMessage, ListenerClosed> {
        self.messages.recv().map_err(|_| ListenerClosed)
    }

    /// Like [`FrameListener::next_message`] but gives up after `timeout`
    pub fn next_message_timeout(&self, timeout: Duration) -> Result<Option<BroadcastMessage>, ListenerClosed> {
        match self.messages.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ListenerClosed),
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for FrameListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn listen(socket: UdpSocket, messages: Sender<BroadcastMessage>, running: Arc<AtomicBool>, inactivity_timeout: Duration) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut last_data: Option<Instant> = None;

    while running.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((len, _)) if len < MIN_DATAGRAM => continue,
            Ok((len, from)) => {
                last_data = Some(Instant::now());
                match serde_json::from_slice::<BroadcastMessage>(&buf[..len]) {
                    Ok(message) => {
                        if messages.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => log::warn!("Undecodable datagram from {}: {}", from, e),
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if last_data.map_or(false, |t| t.elapsed() >= inactivity_timeout) {
                    log::info!("No frames for {:?}, closing listener", inactivity_timeout);
                    break;
                }
            }
            Err(e) => {
                log::error!("Listener socket failed: {}", e);
                break;
            }
        }
    }
}
