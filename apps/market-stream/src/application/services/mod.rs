//! Application Services
//!
//! Services composing the domain types and infrastructure adapters into the
//! real-time chart pipeline.

mod chart_feed;

pub use chart_feed::{ChartFeed, ChartFeedConfig, ChartFrame};
