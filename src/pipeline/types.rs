//! Core data structures shared by every pipeline stage
//!
//! `Point` is what the extractor produces and the window buffer stores.
//! `SeriesBucket` and `CategoryRow` are the only shapes consumers ever see.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Untyped live record as delivered by the transport (a JSON object)
pub type RawEvent = serde_json::Value;

/// Untyped historical record used for one-shot hydration
pub type RawSnapshotRow = serde_json::Value;

/// One normalized observation
///
/// Created by the extractor and never mutated afterwards; the buffer only
/// reorders and drops whole points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Event time in milliseconds since the Unix epoch
    pub timestamp_ms: i64,

    /// Discrete label used by category summaries (device type, status class)
    pub category: Option<String>,

    /// Metric values keyed by metric name
    pub metrics: BTreeMap<String, f64>,
}

impl Point {
    pub fn new(timestamp_ms: i64) -> Self {
        Self {
            timestamp_ms,
            category: None,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    /// Identity used by the alert ledger
    pub fn key(&self) -> String {
        self.timestamp_ms.to_string()
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }
}

/// Retention settings for one metric stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Trailing span of retained data
    pub window_duration_ms: i64,

    /// Hard cap on buffered points (0 = unbounded)
    #[serde(default)]
    pub max_points: usize,

    /// Width of time-series buckets; required for series queries
    #[serde(default)]
    pub bucket_width_ms: Option<i64>,
}

impl WindowConfig {
    pub fn new(window_duration_ms: i64, max_points: usize, bucket_width_ms: Option<i64>) -> Self {
        Self {
            window_duration_ms,
            max_points,
            bucket_width_ms,
        }
    }

    /// Oldest timestamp still inside the window at `now_ms` (inclusive)
    pub fn cutoff(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.window_duration_ms)
    }

    pub fn is_capped(&self) -> bool {
        self.max_points > 0
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_duration_ms: 5 * 60 * 1000,
            max_points: 0,
            bucket_width_ms: Some(60 * 1000),
        }
    }
}

/// Summary statistics for one metric inside one bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub count: usize,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
    pub p99: f64,
}

/// One fixed-width time slice of the series output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesBucket {
    pub bucket_start_ms: i64,
    pub metrics: BTreeMap<String, MetricStats>,
}

impl SeriesBucket {
    pub fn stats(&self, metric: &str) -> Option<&MetricStats> {
        self.metrics.get(metric)
    }
}

/// One row of the category summary output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRow {
    pub category: String,
    pub count: usize,
    pub percentage_of_total: f64,
    pub avg_by_metric: BTreeMap<String, f64>,
}

/// Which side of a threshold range was crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Above,
    Below,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Above => "above",
            Direction::Below => "below",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Out-of-range notification delivered to the registered alert sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub timestamp_ms: i64,
    pub metric_key: String,
    pub value: f64,
    pub direction: Direction,

    /// The bound that was crossed (`min` for `Below`, `max` for `Above`)
    pub bound: f64,
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {:.3} is {} {:.3} at {}",
            self.metric_key, self.value, self.direction, self.bound, self.timestamp_ms
        )
    }
}
