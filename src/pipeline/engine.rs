//! Metric Engine - composition root for one metric stream
//!
//! Owns the window buffer, the threshold monitor and the eviction scheduler
//! for a single widget, and exposes the Hydrate / Ingest / Query / Config
//! operations on top of them.
//!
//! ## Architecture
//!
//! ```text
//! RawSnapshotRow[] ─ hydrate() ─┐
//!                               ├─> normalize ─> EngineCore (Mutex) ─> get_series()
//! RawEvent[] ───── ingest() ────┘                  │  ▲                get_category_summary()
//!                                                  │  └── scheduler tick (evict)
//!                                                  └─> alerts ─> on_alert sink
//! ```
//!
//! Every mutation (hydrate, ingest, tick, reconfiguration) runs inside one
//! critical section on `EngineCore`, so queries never see a half-merged or
//! half-evicted buffer. Alert callbacks run after the lock is released.

use super::aggregator::{Aggregator, CategorySummary, TimeBucketSeries};
use super::error::{EngineError, HydrateError};
use super::extractor::{normalize_batch, FieldMapping};
use super::lock_state;
use super::profiles::StreamProfile;
use super::scheduler::{Evictable, EvictionScheduler, NowFn};
use super::snapshot::SnapshotSource;
use super::thresholds::{RuleSet, ThresholdMonitor};
use super::types::{Alert, CategoryRow, Point, RawEvent, RawSnapshotRow, SeriesBucket, WindowConfig};
use super::windows::{EvictionReport, WindowBuffer};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Registered alert callback
pub type AlertSink = dyn Fn(&Alert) + Send + Sync;

/// Lifetime counters for one engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub points_admitted: u64,
    pub records_skipped: u64,
    pub batches_dropped: u64,
    pub points_evicted: u64,
    pub alerts_emitted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydrationState {
    Empty,
    Hydrating,
    Hydrated,
}

/// What happened to one `ingest` batch
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Hydration was in flight; the whole batch was discarded
    DroppedDuringHydration,
    Applied {
        admitted: usize,
        skipped: usize,
        alerts: Vec<Alert>,
    },
}

impl IngestOutcome {
    pub fn alerts(&self) -> &[Alert] {
        match self {
            IngestOutcome::Applied { alerts, .. } => alerts,
            IngestOutcome::DroppedDuringHydration => &[],
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, IngestOutcome::DroppedDuringHydration)
    }
}

/// Mutable state guarded by the engine lock
struct EngineCore {
    buffer: WindowBuffer,
    monitor: ThresholdMonitor,
    hydrated: bool,
    hydrating: bool,
    stats: EngineStats,
}

impl EngineCore {
    /// Merge points into the buffer; returns the ones that survived eviction
    fn merge(&mut self, points: Vec<Point>, now_ms: i64) -> Vec<Point> {
        let (report, admitted) = self.buffer.admit_batch(points, now_ms);
        self.stats.points_evicted += report.total() as u64;
        self.stats.points_admitted += admitted.len() as u64;
        admitted
    }

    fn admit(&mut self, points: Vec<Point>, now_ms: i64) -> (usize, Vec<Alert>) {
        let admitted = self.merge(points, now_ms);
        let cutoff = self.buffer.config().cutoff(now_ms);

        let alerts = self.monitor.evaluate_incremental(&admitted, cutoff);
        self.monitor.retain_buffered(&self.buffer);
        self.stats.alerts_emitted += alerts.len() as u64;

        (admitted.len(), alerts)
    }

    fn hydration_state(&self) -> HydrationState {
        if self.hydrated {
            HydrationState::Hydrated
        } else if self.hydrating {
            HydrationState::Hydrating
        } else {
            HydrationState::Empty
        }
    }
}

impl Evictable for EngineCore {
    fn evict_expired(&mut self, now_ms: i64) -> EvictionReport {
        let report = self.buffer.evict(now_ms);
        self.monitor.prune_older_than(self.buffer.config().cutoff(now_ms));
        self.monitor.retain_buffered(&self.buffer);
        self.stats.points_evicted += report.total() as u64;
        report
    }
}

/// Clears the in-flight flag if a `hydrate_from` future is dropped or fails
struct HydrationGuard<'a> {
    core: &'a Mutex<EngineCore>,
    armed: bool,
}

impl Drop for HydrationGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            lock_state(self.core).hydrating = false;
        }
    }
}

fn validate_window(config: &WindowConfig) -> Result<(), EngineError> {
    if config.window_duration_ms <= 0 {
        return Err(EngineError::InvalidConfig(format!(
            "window duration must be positive, got {}ms",
            config.window_duration_ms
        )));
    }
    if let Some(width) = config.bucket_width_ms {
        if width <= 0 {
            return Err(EngineError::InvalidConfig(format!(
                "bucket width must be positive, got {}ms",
                width
            )));
        }
    }
    Ok(())
}

/// Windowed aggregation engine for one metric stream
pub struct MetricEngine {
    name: String,
    core: Arc<Mutex<EngineCore>>,
    mapping: FieldMapping,
    summary: CategorySummary,
    scheduler: Mutex<EvictionScheduler>,
    alert_sink: Mutex<Option<Arc<AlertSink>>>,
    now_fn: Arc<NowFn>,
}

impl MetricEngine {
    /// Create an engine reading wall-clock time
    pub fn new(profile: StreamProfile) -> Result<Self, EngineError> {
        Self::new_with_timestamp_fn(profile, Box::new(|| chrono::Utc::now().timestamp_millis()))
    }

    /// Create an engine with a custom clock (milliseconds since the epoch)
    ///
    /// Used by tests to drive admission and eviction deterministically.
    pub fn new_with_timestamp_fn(
        profile: StreamProfile,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Result<Self, EngineError> {
        validate_window(&profile.window)?;
        if profile.eviction_interval_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "eviction interval must be positive".to_string(),
            ));
        }

        let core = EngineCore {
            buffer: WindowBuffer::new(profile.window, profile.dedup),
            monitor: ThresholdMonitor::default(),
            hydrated: false,
            hydrating: false,
            stats: EngineStats::default(),
        };

        Ok(Self {
            name: profile.name,
            core: Arc::new(Mutex::new(core)),
            mapping: profile.mapping,
            summary: CategorySummary {
                order: profile.categories,
            },
            scheduler: Mutex::new(EvictionScheduler::new(Duration::from_millis(
                profile.eviction_interval_ms,
            ))),
            alert_sink: Mutex::new(None),
            now_fn: Arc::from(now_fn),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn now(&self) -> i64 {
        (*self.now_fn)()
    }

    // ------------------------------------------------------------------
    // Hydration
    // ------------------------------------------------------------------

    /// One-shot backfill from rows the caller already holds
    ///
    /// Returns `false` without touching the buffer if the engine is already
    /// hydrated or a `hydrate_from` is in flight. Snapshot rows are merged
    /// but not evaluated against thresholds.
    pub fn hydrate(&self, rows: &[RawSnapshotRow]) -> bool {
        let now = self.now();
        let (points, skipped) = normalize_batch(rows, &self.mapping, now);

        let mut core = lock_state(&self.core);
        if core.hydrated || core.hydrating {
            log::debug!("[{}] Hydrate ignored ({:?})", self.name, core.hydration_state());
            return false;
        }

        self.apply_snapshot(&mut core, points, skipped, now);
        true
    }

    /// Fetch a snapshot from `source` and hydrate with it
    ///
    /// While the fetch is pending, `ingest` drops incoming batches. On fetch
    /// failure, or if this future is dropped before completion, the engine
    /// returns to not-hydrated and a later call may retry.
    pub async fn hydrate_from<S>(&self, source: &S) -> Result<bool, HydrateError>
    where
        S: SnapshotSource + ?Sized,
    {
        {
            let mut core = lock_state(&self.core);
            if core.hydrated || core.hydrating {
                return Ok(false);
            }
            core.hydrating = true;
        }
        let mut guard = HydrationGuard {
            core: &self.core,
            armed: true,
        };

        log::info!("[{}] 💧 Hydrating from {}", self.name, source.describe());

        let rows = match source.fetch().await {
            Ok(rows) => rows,
            Err(e) => {
                log::warn!("[{}] Hydration failed: {}", self.name, e);
                return Err(e);
            }
        };

        let now = self.now();
        let (points, skipped) = normalize_batch(&rows, &self.mapping, now);

        let mut core = lock_state(&self.core);
        guard.armed = false;
        core.hydrating = false;
        self.apply_snapshot(&mut core, points, skipped, now);
        Ok(true)
    }

    fn apply_snapshot(&self, core: &mut EngineCore, points: Vec<Point>, skipped: usize, now_ms: i64) {
        let received = points.len() + skipped;
        let admitted = core.merge(points, now_ms);
        core.monitor.retain_buffered(&core.buffer);
        core.stats.records_skipped += skipped as u64;
        core.hydrated = true;

        log::info!(
            "[{}] ✅ Hydrated: {} rows, {} admitted, {} skipped, buffer={}",
            self.name,
            received,
            admitted.len(),
            skipped,
            core.buffer.len()
        );
    }

    pub fn state(&self) -> HydrationState {
        lock_state(&self.core).hydration_state()
    }

    pub fn is_hydrated(&self) -> bool {
        lock_state(&self.core).hydrated
    }

    // ------------------------------------------------------------------
    // Ingestion
    // ------------------------------------------------------------------

    /// Normalize, merge and evaluate one live batch
    ///
    /// The registered alert sink is called once per new alert, after the
    /// engine lock has been released.
    pub fn ingest(&self, batch: &[RawEvent]) -> IngestOutcome {
        let now = self.now();
        let (points, skipped) = normalize_batch(batch, &self.mapping, now);

        let (admitted, alerts) = {
            let mut core = lock_state(&self.core);
            if core.hydrating {
                core.stats.batches_dropped += 1;
                log::warn!(
                    "[{}] Dropping batch of {} records: hydration in flight",
                    self.name,
                    batch.len()
                );
                return IngestOutcome::DroppedDuringHydration;
            }

            core.stats.records_skipped += skipped as u64;
            core.admit(points, now)
        };

        if !alerts.is_empty() {
            let sink = lock_state(&self.alert_sink).clone();
            if let Some(sink) = sink {
                for alert in &alerts {
                    (*sink)(alert);
                }
            }
        }

        IngestOutcome::Applied {
            admitted,
            skipped,
            alerts,
        }
    }

    /// Register the single alert sink, replacing any previous one
    pub fn on_alert<F>(&self, callback: F)
    where
        F: Fn(&Alert) + Send + Sync + 'static,
    {
        *lock_state(&self.alert_sink) = Some(Arc::new(callback));
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Replace the window settings and evict immediately under them
    pub fn set_window(&self, config: WindowConfig) -> Result<(), EngineError> {
        validate_window(&config)?;
        let now = self.now();

        let mut guard = lock_state(&self.core);
        let core = &mut *guard;
        let report = core.buffer.set_config(config, now);
        let cutoff = core.buffer.config().cutoff(now);
        core.monitor.prune_older_than(cutoff);
        core.monitor.retain_buffered(&core.buffer);
        core.stats.points_evicted += report.total() as u64;

        log::info!(
            "[{}] Window reconfigured: {}ms, max_points={}, evicted {}",
            self.name,
            core.buffer.config().window_duration_ms,
            core.buffer.config().max_points,
            report.total()
        );
        Ok(())
    }

    /// Replace the threshold rules; an invalid set leaves the old one active
    pub fn set_thresholds(&self, rules: RuleSet) -> Result<(), EngineError> {
        let mut core = lock_state(&self.core);
        match core.monitor.set_thresholds(rules) {
            Ok(true) => {
                log::info!(
                    "[{}] 🎯 Thresholds updated ({} rules), alert ledger cleared",
                    self.name,
                    core.monitor.rules().rules.len()
                );
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                log::warn!("[{}] Rejected threshold update: {}", self.name, e);
                Err(e)
            }
        }
    }

    pub fn thresholds(&self) -> RuleSet {
        lock_state(&self.core).monitor.rules().clone()
    }

    pub fn window_config(&self) -> WindowConfig {
        *lock_state(&self.core).buffer.config()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Time-bucketed series; empty when no bucket width is configured
    pub fn get_series(&self) -> Vec<SeriesBucket> {
        let core = lock_state(&self.core);
        match core.buffer.config().bucket_width_ms {
            Some(width) => TimeBucketSeries::new(width).aggregate(core.buffer.points()),
            None => Vec::new(),
        }
    }

    pub fn get_category_summary(&self) -> Vec<CategoryRow> {
        let core = lock_state(&self.core);
        self.summary.aggregate(core.buffer.points())
    }

    pub fn get_total_count(&self) -> usize {
        lock_state(&self.core).buffer.len()
    }

    /// Buffered timestamps in ascending order
    pub fn buffered_timestamps(&self) -> Vec<i64> {
        lock_state(&self.core)
            .buffer
            .points()
            .iter()
            .map(|p| p.timestamp_ms)
            .collect()
    }

    pub fn stats(&self) -> EngineStats {
        lock_state(&self.core).stats
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Start periodic eviction; a no-op if already running
    pub fn start(&self) -> Result<(), EngineError> {
        let mut scheduler = lock_state(&self.scheduler);
        scheduler.start(self.core.clone(), self.now_fn.clone())?;
        Ok(())
    }

    /// Stop periodic eviction; no tick mutates the buffer after this returns
    pub fn stop(&self) {
        lock_state(&self.scheduler).stop(&self.core);
    }

    pub fn is_running(&self) -> bool {
        lock_state(&self.scheduler).is_running()
    }

    /// Run one eviction pass now, outside the scheduler
    pub fn tick(&self) -> EvictionReport {
        let now = self.now();
        lock_state(&self.core).evict_expired(now)
    }
}
