//! # Connection Management Module
//!
//! Receives telemetry from a producer over TCP, one JSON message per line.
//!
//! ## Key Components
//! - `ConnectionManager`: owns the transport thread and its Tokio runtime
//! - `TransportEvent`: what the transport reports back to the main loop
//! - Stop flag shared with the main loop for graceful shutdown
//!
//! The connection is re-established with capped exponential backoff whenever
//! it fails or the producer closes it. Ctrl-C is reported as
//! [`TransportEvent::Shutdown`].

use crate::error::{Report, TransportError};
use crossbeam_channel::Sender;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::time::{sleep, timeout, Instant};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How often blocked reads and backoff sleeps re-check the stop flag
const STOP_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(String),
    Disconnected,
    /// One non-empty line of text
    Message(String),
    /// Ctrl-C received
    Shutdown,
}

/// Runs the transport in a dedicated thread with its own Tokio runtime so
/// the main loop never blocks on the network.
pub struct ConnectionManager {
    addr: String,
    events: Sender<TransportEvent>,
    stop: Arc<AtomicBool>,
    listen_for_ctrl_c: bool,
}

impl ConnectionManager {
    pub fn new(addr: impl Into<String>, events: Sender<TransportEvent>) -> Self {
        Self {
            addr: addr.into(),
            events,
            stop: Arc::new(AtomicBool::new(false)),
            listen_for_ctrl_c: true,
        }
    }

    /// Whether Ctrl-C is turned into [`TransportEvent::Shutdown`]
    pub fn with_ctrl_c(mut self, enabled: bool) -> Self {
        self.listen_for_ctrl_c = enabled;
        self
    }

    /// Set to true to make [`run`](Self::run) return
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Connect, read and reconnect until stopped.
    ///
    /// Blocks; call it from a spawned thread.
    pub fn run(self) {
        let rt = match Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                let error = TransportError::RuntimeCreation(e);
                log::error!("{}", Report(&error));
                let _ = self.events.send(TransportEvent::Shutdown);
                return;
            }
        };

        rt.block_on(self.serve());
        log::info!("Transport stopped");
    }

    async fn serve(&self) {
        if self.listen_for_ctrl_c {
            let stop = Arc::clone(&self.stop);
            let events = self.events.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::info!("Ctrl-C received");
                    stop.store(true, Ordering::Relaxed);
                    let _ = events.send(TransportEvent::Shutdown);
                }
            });
        }

        let mut backoff = INITIAL_BACKOFF;
        while !self.should_stop() {
            match self.read_session(&mut backoff).await {
                Ok(()) => log::info!("Connection to {} closed", self.addr),
                Err(e) => log::warn!("{}", Report(&e)),
            }
            if self.should_stop() {
                break;
            }

            log::info!("Reconnecting to {} in {:?}", self.addr, backoff);
            self.pause(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    async fn read_session(&self, backoff: &mut Duration) -> Result<(), TransportError> {
        let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(TransportError::Connect {
                    addr: self.addr.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(TransportError::Connect {
                    addr: self.addr.clone(),
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                })
            }
        };

        *backoff = INITIAL_BACKOFF;
        log::info!("Connected to {}", self.addr);
        if self.events.send(TransportEvent::Connected(self.addr.clone())).is_err() {
            self.stop.store(true, Ordering::Relaxed);
            return Ok(());
        }

        let result = self.read_lines(stream).await;
        let _ = self.events.send(TransportEvent::Disconnected);
        result
    }

    async fn read_lines(&self, stream: TcpStream) -> Result<(), TransportError> {
        let mut lines = BufReader::new(stream).lines();
        loop {
            if self.should_stop() {
                return Ok(());
            }
            // next_line is cancel safe, so timing out loses nothing
            match timeout(STOP_POLL, lines.next_line()).await {
                Err(_) => continue,
                Ok(Ok(Some(line))) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if self.events.send(TransportEvent::Message(line.to_string())).is_err() {
                        log::debug!("Event receiver gone, stopping transport");
                        self.stop.store(true, Ordering::Relaxed);
                        return Ok(());
                    }
                }
                Ok(Ok(None)) => return Ok(()),
                Ok(Err(e)) => return Err(TransportError::Read(e)),
            }
        }
    }

    async fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.should_stop() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(STOP_POLL.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::io::Write;
    use std::net::TcpListener;
    use std::thread;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_forwards_lines_and_stops() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (sender, receiver) = unbounded();
        let manager = ConnectionManager::new(addr.clone(), sender).with_ctrl_c(false);
        let stop = manager.stop_flag();
        let handle = thread::spawn(move || manager.run());

        let (mut socket, _) = listener.accept().unwrap();
        socket.write_all(b"{\"samples\":[[0,1]]}\n\n  second  \n").unwrap();
        socket.flush().unwrap();

        assert_eq!(receiver.recv_timeout(WAIT).unwrap(), TransportEvent::Connected(addr));
        assert_eq!(
            receiver.recv_timeout(WAIT).unwrap(),
            TransportEvent::Message("{\"samples\":[[0,1]]}".into())
        );
        assert_eq!(receiver.recv_timeout(WAIT).unwrap(), TransportEvent::Message("second".into()));

        stop.store(true, Ordering::Relaxed);
        assert_eq!(receiver.recv_timeout(WAIT).unwrap(), TransportEvent::Disconnected);
        handle.join().unwrap();
    }

    #[test]
    fn test_stop_while_reconnecting() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let (sender, receiver) = unbounded();
        let manager = ConnectionManager::new(addr, sender).with_ctrl_c(false);
        let stop = manager.stop_flag();
        let handle = thread::spawn(move || manager.run());

        thread::sleep(Duration::from_millis(200));
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();

        assert!(receiver.try_iter().all(|event| !matches!(event, TransportEvent::Message(_))));
    }

    #[test]
    fn test_reconnects_after_peer_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (sender, receiver) = unbounded();
        let manager = ConnectionManager::new(addr, sender).with_ctrl_c(false);
        let stop = manager.stop_flag();
        let handle = thread::spawn(move || manager.run());

        let (first, _) = listener.accept().unwrap();
        drop(first);
        let (mut second, _) = listener.accept().unwrap();
        second.write_all(b"again\n").unwrap();

        let mut connects = 0;
        let mut disconnected = false;
        loop {
            match receiver.recv_timeout(WAIT).unwrap() {
                TransportEvent::Connected(_) => connects += 1,
                TransportEvent::Disconnected => disconnected = true,
                TransportEvent::Message(text) => {
                    assert_eq!(text, "again");
                    break;
                }
                TransportEvent::Shutdown => panic!("unexpected shutdown"),
            }
        }
        assert_eq!(connects, 2);
        assert!(disconnected);

        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
