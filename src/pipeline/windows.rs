//! Bounded, time-ordered point buffer with time and count eviction
//!
//! The buffer is kept sorted ascending by `timestamp_ms`, so both eviction
//! rules are prefix drops. Every operation takes `now_ms` explicitly; the
//! buffer never reads a clock.

use super::types::{Point, WindowConfig};
use serde::{Deserialize, Serialize};

/// How colliding timestamps are treated on insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Raw per-event sources: equal timestamps are distinct events
    None,
    /// Pre-bucketed sources: one point per timestamp, latest delivery wins
    ByTimestamp,
}

/// Result of one eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub by_time: usize,
    pub by_count: usize,
}

impl EvictionReport {
    pub fn total(&self) -> usize {
        self.by_time + self.by_count
    }
}

#[derive(Debug, Clone)]
pub struct WindowBuffer {
    points: Vec<Point>,
    config: WindowConfig,
    dedup: DedupPolicy,
}

impl WindowBuffer {
    pub fn new(config: WindowConfig, dedup: DedupPolicy) -> Self {
        Self {
            points: Vec::new(),
            config,
            dedup,
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub fn dedup_policy(&self) -> DedupPolicy {
        self.dedup
    }

    /// Replace the retention settings and evict under the new ones
    pub fn set_config(&mut self, config: WindowConfig, now_ms: i64) -> EvictionReport {
        self.config = config;
        self.evict(now_ms)
    }

    /// Merge a batch, restore ordering, dedupe if configured, then evict
    pub fn insert_batch(&mut self, batch: Vec<Point>, now_ms: i64) -> EvictionReport {
        self.admit_batch(batch, now_ms).0
    }

    /// Like `insert_batch`, also returning the incoming points that are
    /// still buffered afterwards, in buffer order
    pub fn admit_batch(&mut self, batch: Vec<Point>, now_ms: i64) -> (EvictionReport, Vec<Point>) {
        if batch.is_empty() {
            return (self.evict(now_ms), Vec::new());
        }

        let mut tagged: Vec<(bool, Point)> = self
            .points
            .drain(..)
            .map(|p| (false, p))
            .chain(batch.into_iter().map(|p| (true, p)))
            .collect();
        // Stable sort: among equal timestamps, later deliveries stay later
        tagged.sort_by_key(|(_, p)| p.timestamp_ms);

        if self.dedup == DedupPolicy::ByTimestamp {
            tagged = dedup_keep_latest(tagged);
        }

        let (incoming, points): (Vec<bool>, Vec<Point>) = tagged.into_iter().unzip();
        self.points = points;

        // Eviction only drops a prefix, so the flags realign after it
        let report = self.evict(now_ms);
        let admitted = self
            .points
            .iter()
            .zip(&incoming[report.total()..])
            .filter(|(_, is_new)| **is_new)
            .map(|(p, _)| p.clone())
            .collect();

        (report, admitted)
    }

    /// Time first, then count
    pub fn evict(&mut self, now_ms: i64) -> EvictionReport {
        EvictionReport {
            by_time: self.evict_by_time(now_ms),
            by_count: self.evict_by_count(),
        }
    }

    /// Drop every point older than `now_ms - window_duration_ms`
    pub fn evict_by_time(&mut self, now_ms: i64) -> usize {
        let cutoff = self.config.cutoff(now_ms);
        let stale = self.points.partition_point(|p| p.timestamp_ms < cutoff);
        self.points.drain(..stale);
        stale
    }

    /// Drop the oldest points beyond `max_points`
    pub fn evict_by_count(&mut self) -> usize {
        if !self.config.is_capped() || self.points.len() <= self.config.max_points {
            return 0;
        }
        let excess = self.points.len() - self.config.max_points;
        self.points.drain(..excess);
        excess
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether any buffered point carries this timestamp
    pub fn contains_timestamp(&self, timestamp_ms: i64) -> bool {
        self.points
            .binary_search_by_key(&timestamp_ms, |p| p.timestamp_ms)
            .is_ok()
    }

    pub fn oldest_timestamp(&self) -> Option<i64> {
        self.points.first().map(|p| p.timestamp_ms)
    }

    pub fn newest_timestamp(&self) -> Option<i64> {
        self.points.last().map(|p| p.timestamp_ms)
    }
}

/// After a stable sort the last entry of each timestamp run is the latest delivery
fn dedup_keep_latest(sorted: Vec<(bool, Point)>) -> Vec<(bool, Point)> {
    let mut kept: Vec<(bool, Point)> = Vec::with_capacity(sorted.len());
    for entry in sorted {
        match kept.last_mut() {
            Some(last) if last.1.timestamp_ms == entry.1.timestamp_ms => *last = entry,
            _ => kept.push(entry),
        }
    }
    kept
}
