//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (stream transport, market API, error reporting).
pub mod ports;

/// Application services composing the real-time chart pipeline.
pub mod services;
