//! End-to-end pipeline scenarios: client → batcher → animator → render loop.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

mod support;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use market_stream::{
    AnimatorConfig, BatcherConfig, ChartFeed, ChartFeedConfig, ClientConfig, Easing, FramePacer,
    MarketEvent, PerformanceMonitor, PriceAnimator, RendererConfig, SmoothRenderer, UpdateBatcher,
};

use support::{MockConnector, client, run_for, settle, tick_json};

const BASE_TS: i64 = 1_700_000_000_000;

#[tokio::test(start_paused = true)]
async fn tick_burst_is_batched_at_frame_cadence() {
    let connector = MockConnector::accepting();
    let client = client(ClientConfig::new("wss://stream.example.test/ws"), connector.clone());

    let batches: Arc<Mutex<Vec<Vec<f64>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    let batcher = Arc::new(UpdateBatcher::new(
        BatcherConfig {
            batch_interval: Duration::from_millis(16),
            max_batch_size: 100,
        },
        move |batch: Vec<MarketEvent>| {
            sink.lock().push(batch.iter().map(MarketEvent::price).collect());
        },
    ));
    let feed = Arc::clone(&batcher);
    client.on_message(move |event| feed.add(event.clone()));

    client.subscribe("EUR/USD");
    client.connect();
    settle().await;
    let peer = connector.take_peer();

    let prices: Vec<f64> = (0..50).map(|i| 1.08 + f64::from(i) * 0.0001).collect();
    for (i, price) in prices.iter().enumerate() {
        let ts = BASE_TS + i64::try_from(i).unwrap() * 2;
        peer.text(tick_json("EUR/USD", *price, ts)).await;
        settle().await;
        run_for(Duration::from_millis(2)).await;
    }
    run_for(Duration::from_millis(30)).await;

    let batches = batches.lock();
    assert_eq!(batches.len(), 7);
    assert!(batches.iter().all(|b| !b.is_empty()));
    let delivered: Vec<f64> = batches.iter().flatten().copied().collect();
    assert_eq!(delivered, prices);
    assert_eq!(batcher.pending_count(), 0);
}

#[test]
fn animator_moves_toward_target_then_snaps() {
    let mut animator = PriceAnimator::new(AnimatorConfig {
        speed: 0.15,
        easing: Easing::EaseOut,
        min_difference: 0.0001,
    });
    animator.set_direct(1.0800);
    animator.set_target(1.0850);

    let first = animator.update();
    assert!((first - 1.081_387_5).abs() < 1e-12);
    assert!(animator.is_active());

    let mut previous = first;
    let mut frames = 1;
    while animator.is_active() {
        let value = animator.update();
        assert!(value >= previous);
        assert!(value <= 1.0850);
        previous = value;
        frames += 1;
        assert!(frames < 100);
    }
    assert_eq!(animator.current(), 1.0850);

    // Sub-threshold moves are treated as noise.
    animator.set_target(1.08505);
    assert!(!animator.is_active());
}

#[test]
fn pacer_renders_at_target_rate_on_faster_host() {
    let start = Instant::now();
    let mut pacer = FramePacer::new(60.0, start);

    let rendered = (1..=1000u32)
        .filter(|i| pacer.on_host_frame(start + Duration::from_millis(16) * *i))
        .count();

    assert!((959..=961).contains(&rendered), "rendered {rendered}");
}

#[test]
fn pacer_decimates_a_fast_host() {
    let start = Instant::now();
    let mut pacer = FramePacer::new(30.0, start);

    let rendered = (1..=600u32)
        .filter(|i| pacer.on_host_frame(start + Duration::from_millis(10) * *i))
        .count();

    assert!((179..=181).contains(&rendered), "rendered {rendered}");
}

#[test]
fn disabled_monitor_reads_zero() {
    let monitor = PerformanceMonitor::new(false);
    for _ in 0..10 {
        monitor.start_frame();
        monitor.record_draw_call(100, 50, 4096);
        monitor.end_frame();
    }

    assert_eq!(monitor.frame_count(), 0);
    assert_eq!(monitor.stats().samples, 0);
    assert_eq!(monitor.current_metrics().draw_calls, 0.0);
}

#[tokio::test(start_paused = true)]
async fn rendered_price_converges_to_last_tick() {
    let connector = MockConnector::accepting();
    let client = client(ClientConfig::new("wss://stream.example.test/ws"), connector.clone());
    let feed = Arc::new(ChartFeed::new(ChartFeedConfig::new("EUR/USD"), client.clone()));
    assert!(feed.start());
    settle().await;
    let peer = connector.take_peer();

    peer.text(tick_json("EUR/USD", 1.0800, BASE_TS)).await;
    settle().await;
    run_for(Duration::from_millis(20)).await;
    assert_eq!(feed.render_frame().price, 1.0800);

    peer.text(tick_json("EUR/USD", 1.0850, BASE_TS + 500)).await;
    settle().await;
    run_for(Duration::from_millis(20)).await;

    let monitor = Arc::new(PerformanceMonitor::new(true));
    let renderer =
        SmoothRenderer::new(RendererConfig::default()).with_monitor(Arc::clone(&monitor));
    let frames: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&frames);
    let render_feed = Arc::clone(&feed);
    assert!(renderer.start(move || sink.lock().push(render_feed.render_frame().price)));

    run_for(Duration::from_secs(2)).await;
    renderer.stop();

    let frames = frames.lock();
    assert!(frames.len() > 60);
    assert!(frames.windows(2).all(|w| w[1] >= w[0]));
    assert_eq!(*frames.last().unwrap(), 1.0850);
    assert!(monitor.frame_count() > 60);
    assert!(monitor.stats().samples > 0);

    let candles = feed.candles();
    assert_eq!(candles.len(), 1);
    assert_eq!(candles[0].close, 1.0850);

    feed.stop();
    assert!(!feed.is_running());
    assert_eq!(client.status(), market_stream::ConnectionStatus::Disconnected);
}
