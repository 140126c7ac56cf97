//! Optional mirroring of project states to and from a paired device.
//!
//! Relay mode is on only when `config.json` carries a pairing credential. The
//! channel runs on its own worker thread; the engine publishes local states to it
//! and drains remote snapshots from it without ever waiting on the network.
//!
//! - [`crypto`]: XChaCha20-Poly1305 sealing of snapshots
//! - [`transport`]: WebSocket and in-memory transports
//! - [`channel`]: the worker, reconnect loop and outbound rate limiting
//! - [`mirror`]: what the engine remembers of the remote side

pub mod backoff;
pub mod channel;
pub mod crypto;
mod mirror;
pub mod transport;

use serde::{Deserialize, Serialize};

pub use channel::{ChannelOptions, RelayChannel, RelayEvent};
pub use crypto::RelayCipher;
pub use mirror::{RemoteEntry, RemoteMirror};
pub use transport::{MemoryTransport, RelayTransport, WebSocketTransport};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RelayError {
    #[error("Relay transport error: {0}")]
    Transport(String),

    #[error("Relay protocol error: {0}")]
    Protocol(String),

    #[error("Relay payload failed to decrypt: {0}")]
    Decrypt(String),

    #[error("Relay encryption failed: {0}")]
    Crypto(String),

    #[error("Invalid relay key: {0}")]
    InvalidKey(String),
}

/// The only relay failure surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No pairing credential configured.
    #[default]
    Disabled,
    Connecting,
    Connected,
    Disconnected,
    /// A payload failed authentication: wrong key or altered in transit.
    Tampering,
    /// The credential itself is unusable.
    Misconfigured,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Tampering)
    }
}
