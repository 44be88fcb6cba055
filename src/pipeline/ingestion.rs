//! Live ingestion - async channel processor for raw event batches
//!
//! The transport layer owns the connection and pushes batches into an
//! `mpsc` channel; this task drains them into the engine until the channel
//! closes.

use super::engine::{IngestOutcome, MetricEngine};
use super::types::RawEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

const THROUGHPUT_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Totals for one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestionSummary {
    pub batches: u64,
    pub records: u64,
    pub dropped_batches: u64,
    pub alerts: u64,
}

/// Drain `rx` into `engine` until every sender is dropped
///
/// Logs throughput every 10 seconds of activity.
pub async fn run_ingestion(
    mut rx: mpsc::Receiver<Vec<RawEvent>>,
    engine: Arc<MetricEngine>,
) -> IngestionSummary {
    log::info!("🚀 Starting live ingestion for '{}'", engine.name());

    let mut summary = IngestionSummary::default();
    let mut window_records = 0u64;
    let mut last_log_time = Instant::now();

    while let Some(batch) = rx.recv().await {
        summary.batches += 1;
        summary.records += batch.len() as u64;
        window_records += batch.len() as u64;

        match engine.ingest(&batch) {
            IngestOutcome::DroppedDuringHydration => summary.dropped_batches += 1,
            IngestOutcome::Applied { alerts, .. } => summary.alerts += alerts.len() as u64,
        }

        let elapsed = last_log_time.elapsed();
        if elapsed >= THROUGHPUT_LOG_INTERVAL {
            log::info!(
                "📊 [{}] Ingestion rate: {:.1} records/sec (buffer: {})",
                engine.name(),
                window_records as f64 / elapsed.as_secs_f64(),
                engine.get_total_count()
            );
            last_log_time = Instant::now();
            window_records = 0;
        }
    }

    log::info!(
        "Ingestion channel closed for '{}' ({} batches, {} records, {} dropped)",
        engine.name(),
        summary.batches,
        summary.records,
        summary.dropped_batches
    );
    summary
}
