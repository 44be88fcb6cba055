//! Read-only aggregation strategies over a buffer snapshot
//!
//! - `TimeBucketSeries`: fixed-width time buckets with count/avg/min/max/p95/p99
//! - `CategorySummary`: per-category counts, share of total and metric averages

use super::types::{CategoryRow, MetricStats, Point, SeriesBucket};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Guards `ceil(count * p)` against products like `19.000000000000004`
const RANK_EPSILON: f64 = 1e-9;

/// A strategy that folds a sorted point slice into a consumer-facing shape
pub trait Aggregator {
    type Output;

    fn aggregate(&self, points: &[Point]) -> Self::Output;
}

/// Nearest-rank percentile over ascending values
///
/// `index(p) = max(0, ceil(count * p) - 1)`. Returns `None` for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (sorted.len() as f64 * p - RANK_EPSILON).ceil().max(0.0) as usize;
    let index = rank.saturating_sub(1).min(sorted.len() - 1);
    Some(sorted[index])
}

/// Summary statistics for an unsorted sample; `None` when empty
pub fn metric_stats(values: &mut [f64]) -> Option<MetricStats> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let count = values.len();
    let sum: f64 = values.iter().sum();

    Some(MetricStats {
        count,
        avg: sum / count as f64,
        min: values[0],
        max: values[count - 1],
        p95: percentile(values, 0.95)?,
        p99: percentile(values, 0.99)?,
    })
}

/// Bucket start for a timestamp (floors toward negative infinity)
pub fn bucket_start(timestamp_ms: i64, bucket_width_ms: i64) -> i64 {
    timestamp_ms.div_euclid(bucket_width_ms) * bucket_width_ms
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBucketSeries {
    pub bucket_width_ms: i64,
}

impl TimeBucketSeries {
    pub fn new(bucket_width_ms: i64) -> Self {
        Self { bucket_width_ms }
    }
}

impl Aggregator for TimeBucketSeries {
    type Output = Vec<SeriesBucket>;

    /// Empty buckets are omitted; gap filling belongs to the renderer
    fn aggregate(&self, points: &[Point]) -> Vec<SeriesBucket> {
        if self.bucket_width_ms <= 0 {
            return Vec::new();
        }

        let mut buckets: BTreeMap<i64, BTreeMap<&str, Vec<f64>>> = BTreeMap::new();
        for point in points {
            let samples = buckets
                .entry(bucket_start(point.timestamp_ms, self.bucket_width_ms))
                .or_default();
            for (metric, value) in &point.metrics {
                samples.entry(metric.as_str()).or_default().push(*value);
            }
        }

        buckets
            .into_iter()
            .map(|(bucket_start_ms, samples)| SeriesBucket {
                bucket_start_ms,
                metrics: samples
                    .into_iter()
                    .filter_map(|(metric, mut values)| {
                        metric_stats(&mut values).map(|stats| (metric.to_string(), stats))
                    })
                    .collect(),
            })
            .collect()
    }
}

/// Output ordering for category rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "categories", rename_all = "snake_case")]
pub enum CategoryOrder {
    /// Open domain: only present categories, ascending by label
    Open,
    /// Closed domain: every listed category in this order, zero counts included.
    /// Points labelled outside the list are not grouped.
    Fixed(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySummary {
    pub order: CategoryOrder,
}

impl CategorySummary {
    pub fn open() -> Self {
        Self {
            order: CategoryOrder::Open,
        }
    }

    /// Repeated labels keep their first position
    pub fn fixed(categories: &[&str]) -> Self {
        let mut seen = BTreeSet::new();
        Self {
            order: CategoryOrder::Fixed(
                categories
                    .iter()
                    .filter(|c| seen.insert(**c))
                    .map(|c| c.to_string())
                    .collect(),
            ),
        }
    }

    fn accepts(&self, category: &str) -> bool {
        match &self.order {
            CategoryOrder::Open => true,
            CategoryOrder::Fixed(domain) => domain.iter().any(|c| c == category),
        }
    }
}

#[derive(Default)]
struct GroupAccumulator {
    count: usize,
    sums: BTreeMap<String, (f64, usize)>,
}

impl Aggregator for CategorySummary {
    type Output = Vec<CategoryRow>;

    fn aggregate(&self, points: &[Point]) -> Vec<CategoryRow> {
        let mut groups: BTreeMap<&str, GroupAccumulator> = BTreeMap::new();
        let mut total = 0usize;

        for point in points {
            let Some(category) = point.category.as_deref() else {
                continue;
            };
            if !self.accepts(category) {
                continue;
            }

            total += 1;
            let group = groups.entry(category).or_default();
            group.count += 1;
            for (metric, value) in &point.metrics {
                let entry = group.sums.entry(metric.clone()).or_insert((0.0, 0));
                entry.0 += value;
                entry.1 += 1;
            }
        }

        let build_row = |category: &str, group: Option<&GroupAccumulator>| {
            let count = group.map_or(0, |g| g.count);
            let percentage_of_total = if total > 0 {
                100.0 * count as f64 / total as f64
            } else {
                0.0
            };
            let avg_by_metric = group
                .map(|g| {
                    g.sums
                        .iter()
                        .map(|(metric, (sum, n))| (metric.clone(), sum / *n as f64))
                        .collect()
                })
                .unwrap_or_default();

            CategoryRow {
                category: category.to_string(),
                count,
                percentage_of_total,
                avg_by_metric,
            }
        };

        match &self.order {
            CategoryOrder::Open => groups
                .iter()
                .map(|(category, group)| build_row(*category, Some(group)))
                .collect(),
            CategoryOrder::Fixed(domain) => {
                // A deserialized domain may still repeat labels
                let mut emitted = BTreeSet::new();
                domain
                    .iter()
                    .filter(|category| emitted.insert(category.as_str()))
                    .map(|category| build_row(category.as_str(), groups.get(category.as_str())))
                    .collect()
            }
        }
    }
}
