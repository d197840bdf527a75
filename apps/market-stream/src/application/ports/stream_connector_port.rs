//! Stream Connector Port (Driven Port)
//!
//! Interface for opening a bidirectional text transport to a market data
//! provider. The adapter owns the socket; the client only sees two
//! channels.
//!
//! Dropping [`StreamTransport::outbound`] asks the adapter to close the
//! socket with the normal closure code.

use async_trait::async_trait;
use tokio::sync::mpsc;

/// WebSocket normal closure code. Closes with this code are not retried.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Transport failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The socket could not be opened.
    #[error("Connection failed: {message}")]
    Connect {
        /// Error details.
        message: String,
    },

    /// The socket failed while open.
    #[error("Transport error: {message}")]
    Io {
        /// Error details.
        message: String,
    },

    /// The peer violated the protocol.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Error details.
        message: String,
    },
}

/// Close frame details.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloseInfo {
    /// Close code, if the peer sent one.
    pub code: Option<u16>,
    /// Close reason.
    pub reason: String,
}

impl CloseInfo {
    /// Whether this close should not trigger a reconnect.
    #[must_use]
    pub const fn is_normal(&self) -> bool {
        matches!(self.code, Some(NORMAL_CLOSURE))
    }
}

/// Event emitted by an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text message.
    Text(String),
    /// The socket closed.
    Closed(CloseInfo),
    /// The socket failed; no further events follow.
    Error(TransportError),
}

/// An open transport.
#[derive(Debug)]
pub struct StreamTransport {
    /// Text messages to send.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Events received, in network order.
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Port for opening streaming transports.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open a transport to `url`.
    async fn open(&self, url: &str) -> Result<StreamTransport, TransportError>;
}
