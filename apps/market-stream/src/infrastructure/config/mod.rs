//! Configuration Module
//!
//! Configuration loading for the market stream service.

mod settings;

pub use settings::{
    BatchSettings, ConfigError, ErrorReporterKind, MarketStreamConfig, PollingSettings,
    RenderSettings, ServerSettings, StreamSettings,
};
