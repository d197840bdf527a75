//! Market Stream Configuration Settings
//!
//! Configuration types for the market stream service, loaded from environment
//! variables.

use std::time::Duration;

use crate::domain::animation::{AnimatorConfig, Easing};
use crate::infrastructure::stream::WireProtocol;

/// Streaming client settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Provider WebSocket URL.
    pub url: String,
    /// Wire protocol spoken by the provider.
    pub protocol: WireProtocol,
    /// Symbols to subscribe on startup.
    pub symbols: Vec<String>,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Random jitter fraction applied to each delay (0 = none).
    pub reconnect_jitter: f64,
    /// Reconnection attempts after the initial connect before giving up.
    pub max_reconnect_attempts: u32,
    /// Keep-alive interval.
    pub heartbeat_interval: Duration,
    /// Inbound silence before the session is considered lost (`None` = off).
    pub heartbeat_timeout: Option<Duration>,
    /// Capacity of the recent-event buffer.
    pub buffer_size: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            protocol: WireProtocol::Json,
            symbols: vec!["EUR/USD".to_string()],
            reconnect_delay_initial: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.0,
            max_reconnect_attempts: 10,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: None,
            buffer_size: 1000,
        }
    }
}

/// Update batching settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    /// Fixed flush cadence.
    pub interval: Duration,
    /// Pending count that forces a synchronous flush.
    pub max_batch_size: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(16),
            max_batch_size: 100,
        }
    }
}

/// Render loop settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    /// Target frames per second.
    pub target_fps: f64,
    /// Enable frame performance tracking.
    pub performance_monitor: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            target_fps: 60.0,
            performance_monitor: false,
        }
    }
}

/// HTTP polling fallback settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingSettings {
    /// Base URL of the market API. `None` disables the fallback.
    pub base_url: Option<String>,
    /// Poll interval.
    pub interval: Duration,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            interval: Duration::from_secs(5),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port (also serves `/metrics`).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Error reporter selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorReporterKind {
    /// Discard reports.
    None,
    /// Structured log plus error counter.
    #[default]
    Tracing,
}

impl ErrorReporterKind {
    /// Parse from string; unknown values yield `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "noop" | "off" => Some(Self::None),
            "tracing" | "log" => Some(Self::Tracing),
            _ => None,
        }
    }

    /// Name used in logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Tracing => "tracing",
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct MarketStreamConfig {
    /// Streaming client settings.
    pub stream: StreamSettings,
    /// Update batching settings.
    pub batch: BatchSettings,
    /// Price animation settings.
    pub animator: AnimatorConfig,
    /// Render loop settings.
    pub render: RenderSettings,
    /// Polling fallback settings.
    pub polling: PollingSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Error reporter selection.
    pub error_reporter: ErrorReporterKind,
}

impl MarketStreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or an
    /// enumerated value is not recognised.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Numeric values that fail to parse fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Same as [`MarketStreamConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let url = env
            .get("MARKET_STREAM_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("MARKET_STREAM_URL".to_string()))?;
        if url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("MARKET_STREAM_URL".to_string()));
        }

        let protocol = match env.get("MARKET_STREAM_PROTOCOL") {
            Some(value) => value
                .parse::<WireProtocol>()
                .map_err(|_| ConfigError::invalid("MARKET_STREAM_PROTOCOL", &value))?,
            None => WireProtocol::default(),
        };

        let defaults = StreamSettings::default();
        let symbols = env
            .get("MARKET_STREAM_SYMBOLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|symbols| !symbols.is_empty())
            .unwrap_or_else(|| defaults.symbols.clone());

        let stream = StreamSettings {
            url,
            protocol,
            symbols,
            reconnect_delay_initial: env.millis(
                "MARKET_STREAM_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs(
                "MARKET_STREAM_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "MARKET_STREAM_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter: env.parse(
                "MARKET_STREAM_RECONNECT_JITTER",
                defaults.reconnect_jitter,
            ),
            max_reconnect_attempts: env.parse(
                "MARKET_STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            heartbeat_interval: env.secs(
                "MARKET_STREAM_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            heartbeat_timeout: env
                .get("MARKET_STREAM_HEARTBEAT_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            buffer_size: env.parse("MARKET_STREAM_BUFFER_SIZE", defaults.buffer_size),
        };

        let batch = BatchSettings {
            interval: env.millis(
                "MARKET_STREAM_BATCH_INTERVAL_MS",
                BatchSettings::default().interval,
            ),
            max_batch_size: env.parse(
                "MARKET_STREAM_MAX_BATCH_SIZE",
                BatchSettings::default().max_batch_size,
            ),
        };

        let animator_defaults = AnimatorConfig::default();
        let easing = match env.get("MARKET_STREAM_ANIMATOR_EASING") {
            Some(value) => value
                .parse::<Easing>()
                .map_err(|_| ConfigError::invalid("MARKET_STREAM_ANIMATOR_EASING", &value))?,
            None => animator_defaults.easing,
        };
        let animator = AnimatorConfig {
            speed: env.parse("MARKET_STREAM_ANIMATOR_SPEED", animator_defaults.speed),
            easing,
            min_difference: env.parse(
                "MARKET_STREAM_ANIMATOR_MIN_DIFFERENCE",
                animator_defaults.min_difference,
            ),
        };

        let render = RenderSettings {
            target_fps: env.parse("MARKET_STREAM_TARGET_FPS", RenderSettings::default().target_fps),
            performance_monitor: env.flag("MARKET_STREAM_PERF_MONITOR"),
        };

        let polling = PollingSettings {
            base_url: env
                .get("MARKET_STREAM_POLLING_URL")
                .filter(|url| !url.trim().is_empty()),
            interval: env.secs(
                "MARKET_STREAM_POLLING_INTERVAL_SECS",
                PollingSettings::default().interval,
            ),
        };

        let server = ServerSettings {
            health_port: env.parse(
                "MARKET_STREAM_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let error_reporter = match env.get("MARKET_STREAM_ERROR_REPORTER") {
            Some(value) => ErrorReporterKind::parse(&value)
                .ok_or_else(|| ConfigError::invalid("MARKET_STREAM_ERROR_REPORTER", &value))?,
            None => ErrorReporterKind::default(),
        };

        Ok(Self {
            stream,
            batch,
            animator,
            render,
            polling,
            server,
            error_reporter,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable holds an unrecognised value.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, value: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| {
            matches!(
                v.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<MarketStreamConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        MarketStreamConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn url_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingEnvVar(_))));
        assert!(matches!(
            load(&[("MARKET_STREAM_URL", "  ")]),
            Err(ConfigError::EmptyValue(_))
        ));
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("MARKET_STREAM_URL", "wss://example.test/ws")]).unwrap();

        assert_eq!(config.stream.protocol, WireProtocol::Json);
        assert_eq!(config.stream.symbols, vec!["EUR/USD"]);
        assert_eq!(config.stream.reconnect_delay_initial, Duration::from_secs(1));
        assert_eq!(config.stream.reconnect_delay_max, Duration::from_secs(30));
        assert_eq!(config.stream.max_reconnect_attempts, 10);
        assert_eq!(config.stream.heartbeat_interval, Duration::from_secs(30));
        assert!(config.stream.heartbeat_timeout.is_none());
        assert_eq!(config.stream.buffer_size, 1000);
        assert_eq!(config.batch, BatchSettings::default());
        assert_eq!(config.animator.easing, Easing::EaseOut);
        assert!((config.render.target_fps - 60.0).abs() < f64::EPSILON);
        assert!(!config.render.performance_monitor);
        assert!(config.polling.base_url.is_none());
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.error_reporter, ErrorReporterKind::Tracing);
    }

    #[test]
    fn overrides_apply() {
        let config = load(&[
            ("MARKET_STREAM_URL", "wss://example.test/ws"),
            ("MARKET_STREAM_PROTOCOL", "framed"),
            ("MARKET_STREAM_SYMBOLS", "EUR/USD, BTC/USD,,"),
            ("MARKET_STREAM_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("MARKET_STREAM_MAX_RECONNECT_ATTEMPTS", "3"),
            ("MARKET_STREAM_HEARTBEAT_TIMEOUT_SECS", "90"),
            ("MARKET_STREAM_BATCH_INTERVAL_MS", "33"),
            ("MARKET_STREAM_ANIMATOR_EASING", "ease-in-out"),
            ("MARKET_STREAM_PERF_MONITOR", "true"),
            ("MARKET_STREAM_POLLING_URL", "http://localhost:3000"),
            ("MARKET_STREAM_ERROR_REPORTER", "none"),
        ])
        .unwrap();

        assert_eq!(config.stream.protocol, WireProtocol::Framed);
        assert_eq!(config.stream.symbols, vec!["EUR/USD", "BTC/USD"]);
        assert_eq!(
            config.stream.reconnect_delay_initial,
            Duration::from_millis(250)
        );
        assert_eq!(config.stream.max_reconnect_attempts, 3);
        assert_eq!(
            config.stream.heartbeat_timeout,
            Some(Duration::from_secs(90))
        );
        assert_eq!(config.batch.interval, Duration::from_millis(33));
        assert_eq!(config.animator.easing, Easing::EaseInOut);
        assert!(config.render.performance_monitor);
        assert_eq!(
            config.polling.base_url.as_deref(),
            Some("http://localhost:3000")
        );
        assert_eq!(config.error_reporter, ErrorReporterKind::None);
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let config = load(&[
            ("MARKET_STREAM_URL", "wss://example.test/ws"),
            ("MARKET_STREAM_BUFFER_SIZE", "lots"),
            ("MARKET_STREAM_HEARTBEAT_TIMEOUT_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.stream.buffer_size, 1000);
        assert!(config.stream.heartbeat_timeout.is_none());
    }

    #[test]
    fn unknown_enumerations_are_rejected() {
        let err = load(&[
            ("MARKET_STREAM_URL", "wss://example.test/ws"),
            ("MARKET_STREAM_PROTOCOL", "carrier-pigeon"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "MARKET_STREAM_PROTOCOL"
        ));

        let err = load(&[
            ("MARKET_STREAM_URL", "wss://example.test/ws"),
            ("MARKET_STREAM_ERROR_REPORTER", "sentry"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
