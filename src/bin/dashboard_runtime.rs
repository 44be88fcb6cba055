//! Dashboard Runtime - runs one metric stream from stdin
//!
//! Reads newline-delimited JSON events from stdin, feeds them through a
//! `MetricEngine` configured from one of the widget presets, and logs
//! alerts plus a periodic summary of the window.
//!
//! Usage:
//!   some-producer | cargo run --release --bin dashboard_runtime
//!
//! Environment variables:
//!   METRICFLOW_PROFILE - page_load | traffic | http_status | device_performance | response_time
//!   METRICFLOW_SNAPSHOT_PATH - JSON snapshot to hydrate from before going live
//!   METRICFLOW_THRESHOLDS_PATH - JSON rule set for alerting
//!   METRICFLOW_CHANNEL_BUFFER - Channel size in batches (default: 10000)
//!   (see `EngineConfig::from_env` for the window overrides)

use dotenv::dotenv;
use log::{error, info, warn};
use metricflow::pipeline::{
    config::EngineConfig, ingestion::run_ingestion, snapshot::FileSnapshotSource, MetricEngine,
    RawEvent, RuleSet,
};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, Duration, Instant, MissedTickBehavior};

const MAX_BATCH: usize = 500;
const BATCH_FLUSH_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = EngineConfig::from_env()?;
    let profile = config.stream_profile()?;
    let summary_interval_ms = profile.eviction_interval_ms;

    info!("🚀 Dashboard Runtime");
    info!("   ├─ Profile: {}", profile.name);
    info!("   ├─ Window: {}ms", profile.window.window_duration_ms);
    info!("   ├─ Max points: {}", profile.window.max_points);
    info!("   ├─ Eviction interval: {}ms", profile.eviction_interval_ms);
    info!("   └─ Channel buffer: {} batches", config.channel_buffer);

    let engine = Arc::new(MetricEngine::new(profile)?);

    if let Some(path) = &config.thresholds_path {
        let contents = tokio::fs::read_to_string(path).await?;
        let rules: RuleSet = serde_json::from_str(&contents)?;
        engine.set_thresholds(rules)?;
    }

    engine.on_alert(|alert| warn!("🚨 ALERT {}", alert));

    // Hydration runs before the stdin reader starts, so no live batch is lost
    if let Some(path) = &config.snapshot_path {
        let source = FileSnapshotSource::new(path);
        if let Err(e) = engine.hydrate_from(&source).await {
            error!("❌ Snapshot hydration failed, continuing live-only: {}", e);
        }
    }

    engine.start()?;

    let (tx, rx) = mpsc::channel::<Vec<RawEvent>>(config.channel_buffer);
    let ingestion = tokio::spawn(run_ingestion(rx, engine.clone()));
    let mut reader = tokio::spawn(read_stdin(tx));

    let summary_engine = engine.clone();
    let reporter = tokio::spawn(async move {
        let mut timer = interval(Duration::from_millis(summary_interval_ms));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            log_summary(&summary_engine);
        }
    });

    info!("🔄 Reading events from stdin (CTRL+C to stop)");

    tokio::select! {
        result = &mut reader => {
            match result {
                Ok(Ok(lines)) => info!("stdin closed after {} lines", lines),
                Ok(Err(e)) => error!("❌ Failed reading stdin: {}", e),
                Err(e) => error!("❌ Reader task failed: {}", e),
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("❌ Failed to listen for CTRL+C: {}", e);
            }
            info!("⚠️  Received CTRL+C, shutting down...");
        }
    }

    // Dropping the reader drops the last sender and closes the channel
    reader.abort();
    reporter.abort();
    engine.stop();

    match tokio::time::timeout(Duration::from_secs(2), ingestion).await {
        Ok(Ok(summary)) => info!(
            "✅ Ingested {} batches ({} records, {} alerts)",
            summary.batches, summary.records, summary.alerts
        ),
        Ok(Err(e)) => error!("❌ Ingestion task failed: {}", e),
        Err(_) => warn!("Ingestion did not drain within 2s"),
    }

    log_summary(&engine);
    info!("✅ Dashboard runtime stopped");
    Ok(())
}

/// Batch stdin lines into the ingestion channel; returns the line count
async fn read_stdin(tx: mpsc::Sender<Vec<RawEvent>>) -> std::io::Result<u64> {
    forward_lines(BufReader::new(tokio::io::stdin()), tx).await
}

/// Parse JSON lines into batches; whatever is pending is sent before a read error is returned
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<Vec<RawEvent>>) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut batch: Vec<RawEvent> = Vec::with_capacity(MAX_BATCH);
    let mut total = 0u64;
    let mut flush_timer = interval_at(Instant::now() + BATCH_FLUSH_INTERVAL, BATCH_FLUSH_INTERVAL);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        if !batch.is_empty() {
                            send_batch(&tx, &mut batch).await;
                        }
                        return Err(e);
                    }
                };
                total += 1;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RawEvent>(&line) {
                    Ok(event) => batch.push(event),
                    Err(e) => log::debug!("Skipping malformed line {}: {}", total, e),
                }
                if batch.len() >= MAX_BATCH && !send_batch(&tx, &mut batch).await {
                    break;
                }
            }
            _ = flush_timer.tick() => {
                if !batch.is_empty() && !send_batch(&tx, &mut batch).await {
                    break;
                }
            }
        }
    }

    if !batch.is_empty() {
        send_batch(&tx, &mut batch).await;
    }
    Ok(total)
}

async fn send_batch(tx: &mpsc::Sender<Vec<RawEvent>>, batch: &mut Vec<RawEvent>) -> bool {
    let ready = std::mem::replace(batch, Vec::with_capacity(MAX_BATCH));
    tx.send(ready).await.is_ok()
}

fn log_summary(engine: &MetricEngine) {
    let stats = engine.stats();
    info!(
        "📊 [{}] buffer={} admitted={} skipped={} evicted={} dropped_batches={} alerts={}",
        engine.name(),
        engine.get_total_count(),
        stats.points_admitted,
        stats.records_skipped,
        stats.points_evicted,
        stats.batches_dropped,
        stats.alerts_emitted
    );

    let series = engine.get_series();
    if let Some(latest) = series.last() {
        for (metric, stats) in &latest.metrics {
            info!(
                "   ├─ bucket {} {}: n={} avg={:.1} p95={:.1} p99={:.1}",
                latest.bucket_start_ms, metric, stats.count, stats.avg, stats.p95, stats.p99
            );
        }
    }

    for row in engine.get_category_summary() {
        info!(
            "   ├─ {}: {} ({:.1}%)",
            row.category, row.count, row.percentage_of_total
        );
    }
}
