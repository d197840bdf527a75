//! Domain Layer - Core market data types and business logic.
//!
//! This layer contains the core domain types for market data with no
//! runtime dependencies. Everything here is synchronous and deterministic.

/// Price interpolation for smooth chart motion.
pub mod animation;

/// Market data types, payload parsing and candle history.
pub mod streaming;

/// Subscription tracking and provider symbol mapping.
pub mod subscription;
