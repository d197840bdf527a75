//! Market data streaming over WebSocket.
//!
//! - [`MarketDataClient`]: connection lifecycle, subscriptions, fan-out
//! - [`codec`]: inbound decoding for JSON and `~m~`-framed providers
//! - [`messages`]: outbound protocol messages
//! - [`TungsteniteConnector`]: the production transport

mod buffer;
mod client;
pub mod codec;
mod heartbeat;
pub mod messages;
mod observers;
mod reconnect;
mod reporter;
mod transport;

pub use buffer::{DEFAULT_BUFFER_SIZE, MessageBuffer};
pub use client::{ClientConfig, ClientError, ClientStats, MarketDataClient};
pub use codec::{CodecError, InboundMessage};
pub use heartbeat::{
    HeartbeatConfig, HeartbeatError, HeartbeatEvent, HeartbeatManager, HeartbeatState,
};
pub use messages::{OutboundMessages, UnknownProtocol, WireProtocol};
pub use observers::{ObserverHandle, ObserverList};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use reporter::TracingErrorReporter;
pub use transport::TungsteniteConnector;
