//! Market Stream Binary
//!
//! Runs the real-time chart pipeline headless: one streaming connection,
//! a chart feed per configured symbol, the paced render loop and the
//! health server.
//!
//! # Usage
//!
//! ```bash
//! MARKET_STREAM_URL=wss://stream.example.com/ws cargo run --bin market-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `MARKET_STREAM_URL`: Provider WebSocket URL
//!
//! ## Optional
//! - `MARKET_STREAM_PROTOCOL`: json | framed (default: json)
//! - `MARKET_STREAM_SYMBOLS`: Comma-separated chart symbols (default: EUR/USD)
//! - `MARKET_STREAM_POLLING_URL`: Market REST API for history and polling fallback
//! - `MARKET_STREAM_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `MARKET_STREAM_ERROR_REPORTER`: none | tracing (default: tracing)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_stream::infrastructure::health::{HealthServer, HealthServerState};
use market_stream::infrastructure::telemetry;
use market_stream::{
    BatcherConfig, CandleHistoryPort, ChartFeed, ChartFeedConfig, ClientConfig, ErrorReporter,
    ErrorReporterKind, HttpMarketApi, MarketDataClient, MarketStreamConfig, NoopErrorReporter,
    PerformanceMonitor, PollingConfig, PollingFallback, RendererConfig, SmoothRenderer,
    TracingErrorReporter, TungsteniteConnector, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Candles requested for each chart's initial history.
const HISTORY_LIMIT: usize = 100;

/// Interval between render summaries in the log.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Fails only when a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("Failed to initialize telemetry")?;

    tracing::info!("Starting Market Stream");

    let _metrics_handle = init_metrics().context("Failed to initialize metrics")?;

    let config = MarketStreamConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let reporter: Arc<dyn ErrorReporter> = match config.error_reporter {
        ErrorReporterKind::None => Arc::new(NoopErrorReporter),
        ErrorReporterKind::Tracing => Arc::new(TracingErrorReporter),
    };

    let client = MarketDataClient::new(
        ClientConfig::from_settings(&config.stream),
        Arc::new(TungsteniteConnector::default()),
        reporter,
    );

    let market_api = match &config.polling.base_url {
        Some(url) => Some(Arc::new(
            HttpMarketApi::new(url.as_str()).context("Failed to create market API client")?,
        )),
        None => None,
    };

    let mut feeds = Vec::with_capacity(config.stream.symbols.len());
    for symbol in &config.stream.symbols {
        let feed_config = ChartFeedConfig::new(symbol.as_str())
            .with_animator(config.animator)
            .with_batcher(BatcherConfig::from_settings(&config.batch));
        let mut feed = ChartFeed::new(feed_config, client.clone());

        if let Some(api) = &market_api {
            match feed.load_history(api.as_ref(), HISTORY_LIMIT).await {
                Ok(loaded) => tracing::info!(symbol = %symbol, loaded, "Loaded chart history"),
                Err(e) => tracing::warn!(symbol = %symbol, error = %e, "History unavailable"),
            }
            let source: Arc<dyn CandleHistoryPort> = api.clone();
            let polling = PollingFallback::new(
                PollingConfig::from_settings(symbol.as_str(), &config.polling),
                source,
            );
            feed = feed.with_polling(polling);
        }

        feed.start();
        feeds.push(feed);
    }
    let feeds = Arc::new(feeds);

    let monitor = Arc::new(PerformanceMonitor::new(config.render.performance_monitor));
    let renderer = SmoothRenderer::new(RendererConfig::from_settings(&config.render))
        .with_monitor(Arc::clone(&monitor));
    let render_feeds = Arc::clone(&feeds);
    let render_monitor = Arc::clone(&monitor);
    renderer.start(move || render_pass(&render_feeds, &render_monitor));

    let health_state = Arc::new(
        HealthServerState::new(env!("CARGO_PKG_VERSION"), client.clone())
            .with_monitor(Arc::clone(&monitor))
            .with_feeds(Arc::clone(&feeds)),
    );
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let summary_feeds = Arc::clone(&feeds);
    let summary_token = shutdown_token.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SUMMARY_INTERVAL);
        loop {
            tokio::select! {
                () = summary_token.cancelled() => break,
                _ = ticker.tick() => log_summary(&summary_feeds),
            }
        }
    });

    tracing::info!(charts = feeds.len(), "Market stream ready");

    await_shutdown(shutdown_token).await;

    renderer.stop();
    for feed in feeds.iter() {
        feed.stop();
    }
    client.disconnect();

    tracing::info!("Market stream stopped");
    Ok(())
}

/// One render pass over every chart.
fn render_pass(feeds: &[ChartFeed], monitor: &PerformanceMonitor) {
    for feed in feeds {
        let frame = feed.render_frame();
        let candles = u64::try_from(frame.candles_len).unwrap_or(u64::MAX);
        monitor.record_draw_call(
            candles.saturating_mul(4),
            candles.saturating_mul(2),
            candles.saturating_mul(64),
        );
        tracing::trace!(
            symbol = feed.symbol(),
            price = frame.price,
            animating = frame.animating,
            candles = frame.candles_len,
            "Rendered frame"
        );
    }
}

fn log_summary(feeds: &[ChartFeed]) {
    for feed in feeds {
        let last = feed.candles().last().copied();
        tracing::info!(
            symbol = feed.symbol(),
            status = %feed.client().status(),
            polling = feed.is_polling(),
            close = last.map(|c| c.close),
            "Chart summary"
        );
    }
}

/// Log the parsed configuration.
fn log_config(config: &MarketStreamConfig) {
    tracing::info!(
        protocol = %config.stream.protocol,
        symbols = ?config.stream.symbols,
        health_port = config.server.health_port,
        target_fps = config.render.target_fps,
        polling = config.polling.base_url.is_some(),
        error_reporter = config.error_reporter.as_str(),
        "Configuration loaded"
    );
    tracing::debug!(url = %config.stream.url, "Stream endpoint");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
