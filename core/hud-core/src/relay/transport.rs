//! Text-frame transports for the relay worker.
//!
//! The worker only needs connect, send, a bounded receive and close. Production
//! uses a blocking WebSocket; tests use [`MemoryTransport`].

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::debug;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use super::RelayError;

pub trait RelayTransport: Send {
    fn connect(&mut self, url: &str) -> Result<(), RelayError>;

    fn send(&mut self, text: &str) -> Result<(), RelayError>;

    /// Waits up to `timeout` for one text frame. `Ok(None)` means nothing arrived.
    fn recv(&mut self, timeout: Duration) -> Result<Option<String>, RelayError>;

    /// Best effort; never blocks on the peer.
    fn close(&mut self);
}

// -----------------------------------------------------------------------------
// WebSocket
// -----------------------------------------------------------------------------

#[derive(Default)]
pub struct WebSocketTransport {
    socket: Option<WebSocket<MaybeTlsStream<TcpStream>>>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn socket(&mut self) -> Result<&mut WebSocket<MaybeTlsStream<TcpStream>>, RelayError> {
        self.socket
            .as_mut()
            .ok_or_else(|| RelayError::Transport("not connected".to_string()))
    }
}

fn set_read_timeout(
    stream: &MaybeTlsStream<TcpStream>,
    timeout: Duration,
) -> std::io::Result<()> {
    match stream {
        MaybeTlsStream::Plain(tcp) => tcp.set_read_timeout(Some(timeout)),
        MaybeTlsStream::Rustls(tls) => tls.sock.set_read_timeout(Some(timeout)),
        _ => Ok(()),
    }
}

impl RelayTransport for WebSocketTransport {
    fn connect(&mut self, url: &str) -> Result<(), RelayError> {
        self.close();
        let (socket, response) =
            tungstenite::connect(url).map_err(|err| RelayError::Transport(err.to_string()))?;
        debug!(status = %response.status(), "Relay socket connected");
        self.socket = Some(socket);
        Ok(())
    }

    fn send(&mut self, text: &str) -> Result<(), RelayError> {
        self.socket()?
            .send(Message::Text(text.to_string()))
            .map_err(|err| RelayError::Transport(err.to_string()))
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<String>, RelayError> {
        let socket = self.socket()?;
        set_read_timeout(socket.get_ref(), timeout)
            .map_err(|err| RelayError::Transport(err.to_string()))?;

        match socket.read() {
            Ok(Message::Text(text)) => Ok(Some(text)),
            Ok(Message::Binary(bytes)) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|err| RelayError::Protocol(err.to_string())),
            Ok(Message::Close(_)) => Err(RelayError::Transport("closed by relay".to_string())),
            // Ping/pong frames are answered by tungstenite itself.
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(None)
            }
            Err(err) => Err(RelayError::Transport(err.to_string())),
        }
    }

    fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            let _ = socket.close(None);
            let _ = socket.flush();
        }
    }
}

// -----------------------------------------------------------------------------
// In-memory
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    connected: bool,
    connect_attempts: usize,
    refuse_connects: usize,
    drop_connection: bool,
    urls: Vec<String>,
    inbound: VecDeque<String>,
    sent: Vec<String>,
}

/// Scripted transport. Clones share state, so a test keeps one handle and gives
/// the other to the channel.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Queues a frame for the channel to receive.
    pub fn push_inbound(&self, text: impl Into<String>) {
        self.state().inbound.push_back(text.into());
    }

    /// Frames the channel has sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// Makes the next `count` connect attempts fail.
    pub fn refuse_connects(&self, count: usize) {
        self.state().refuse_connects = count;
    }

    /// Fails the next receive as if the socket had dropped.
    pub fn drop_connection(&self) {
        self.state().drop_connection = true;
    }

    pub fn connect_attempts(&self) -> usize {
        self.state().connect_attempts
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn urls(&self) -> Vec<String> {
        self.state().urls.clone()
    }
}

impl RelayTransport for MemoryTransport {
    fn connect(&mut self, url: &str) -> Result<(), RelayError> {
        let mut state = self.state();
        state.connect_attempts += 1;
        state.urls.push(url.to_string());
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(RelayError::Transport("connection refused".to_string()));
        }
        state.connected = true;
        Ok(())
    }

    fn send(&mut self, text: &str) -> Result<(), RelayError> {
        let mut state = self.state();
        if !state.connected {
            return Err(RelayError::Transport("not connected".to_string()));
        }
        state.sent.push(text.to_string());
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<Option<String>, RelayError> {
        {
            let mut state = self.state();
            if state.drop_connection {
                state.drop_connection = false;
                state.connected = false;
                return Err(RelayError::Transport("connection reset".to_string()));
            }
            if let Some(text) = state.inbound.pop_front() {
                return Ok(Some(text));
            }
        }
        thread::sleep(timeout.min(Duration::from_millis(5)));
        Ok(None)
    }

    fn close(&mut self) {
        self.state().connected = false;
    }
}
