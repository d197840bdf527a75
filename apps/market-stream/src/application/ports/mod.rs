//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `StreamConnector`: opens a streaming transport to the market data provider
//! - `CandleHistoryPort` / `PriceLookupPort`: HTTP market data collaborators
//! - `ErrorReporter`: optional error reporting capability

mod error_reporter_port;
mod market_api_port;
mod stream_connector_port;

pub use error_reporter_port::{ErrorContext, ErrorReporter, NoopErrorReporter};
pub use market_api_port::{CandleHistoryPort, MarketApiError, PriceLookupPort};
#[cfg(test)]
pub use market_api_port::{MockCandleHistoryPort, MockPriceLookupPort};
pub use stream_connector_port::{
    CloseInfo, StreamConnector, StreamTransport, TransportError, TransportEvent, NORMAL_CLOSURE,
};
