//! Widget presets
//!
//! Each dashboard widget is a thin instantiation of the engine: its own
//! window, field mapping, dedup policy and category ordering.

use super::aggregator::CategoryOrder;
use super::extractor::{
    CategorySource, FieldMapping, InvalidValuePolicy, TimestampFallback, UNKNOWN_CATEGORY,
};
use super::types::WindowConfig;
use super::windows::DedupPolicy;
use serde::{Deserialize, Serialize};

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;

/// HTTP status classes, always emitted in this order
pub const STATUS_CLASSES: [&str; 4] = ["2xx", "3xx", "4xx", "5xx"];

/// Everything needed to stand up one metric stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamProfile {
    pub name: String,
    pub mapping: FieldMapping,
    pub window: WindowConfig,
    pub dedup: DedupPolicy,
    pub categories: CategoryOrder,
    pub eviction_interval_ms: u64,
}

impl StreamProfile {
    /// Page-load trend: per-event load times bucketed per minute over an hour
    pub fn page_load_trend() -> Self {
        Self {
            name: "page_load".to_string(),
            mapping: FieldMapping::new(&["serverTimestamp", "timestamp"], TimestampFallback::ExtractionTime)
                .metric(
                    "load_time",
                    &["pageLoadTime", "loadTime", "avgLoadTime"],
                    None,
                    InvalidValuePolicy::DropPoint,
                )
                .metric("ttfb", &["ttfb", "timeToFirstByte"], None, InvalidValuePolicy::Omit),
            window: WindowConfig::new(60 * MINUTE_MS, 0, Some(MINUTE_MS)),
            dedup: DedupPolicy::None,
            categories: CategoryOrder::Open,
            eviction_interval_ms: 10_000,
        }
    }

    /// Traffic trend: pre-aggregated per-minute counters, one row per bucket
    pub fn traffic_trend() -> Self {
        Self {
            name: "traffic".to_string(),
            mapping: FieldMapping::new(&["bucketStart", "timestamp"], TimestampFallback::Reject)
                .metric(
                    "requests",
                    &["requestCount", "requests", "count"],
                    None,
                    InvalidValuePolicy::CoerceZero,
                )
                .metric(
                    "unique_visitors",
                    &["uniqueVisitors", "visitors"],
                    None,
                    InvalidValuePolicy::CoerceZero,
                ),
            window: WindowConfig::new(60 * MINUTE_MS, 60, Some(MINUTE_MS)),
            dedup: DedupPolicy::ByTimestamp,
            categories: CategoryOrder::Open,
            eviction_interval_ms: 30_000,
        }
    }

    /// HTTP status distribution over the four fixed status classes
    pub fn http_status_distribution() -> Self {
        Self {
            name: "http_status".to_string(),
            mapping: FieldMapping::new(&["serverTimestamp", "timestamp"], TimestampFallback::ExtractionTime)
                .category(
                    vec![
                        CategorySource::StatusClass("statusCode".to_string()),
                        CategorySource::StatusClass("status".to_string()),
                    ],
                    None,
                )
                .metric("response_time", &["responseTime", "duration"], None, InvalidValuePolicy::Omit),
            window: WindowConfig::new(5 * MINUTE_MS, 5_000, None),
            dedup: DedupPolicy::None,
            categories: CategoryOrder::Fixed(STATUS_CLASSES.iter().map(|c| c.to_string()).collect()),
            eviction_interval_ms: 5_000,
        }
    }

    /// Device performance distribution: load time grouped by device class
    pub fn device_performance() -> Self {
        Self {
            name: "device_performance".to_string(),
            mapping: FieldMapping::new(&["serverTimestamp", "timestamp"], TimestampFallback::ExtractionTime)
                .category(
                    vec![
                        CategorySource::Field("hardwareType".to_string()),
                        CategorySource::Field("deviceType".to_string()),
                        CategorySource::UserAgent("userAgent".to_string()),
                    ],
                    Some(UNKNOWN_CATEGORY),
                )
                .metric(
                    "load_time",
                    &["pageLoadTime", "loadTime", "avgLoadTime"],
                    None,
                    InvalidValuePolicy::DropPoint,
                ),
            window: WindowConfig::new(15 * MINUTE_MS, 10_000, None),
            dedup: DedupPolicy::None,
            categories: CategoryOrder::Open,
            eviction_interval_ms: 10_000,
        }
    }

    /// Response-time stats: latency percentiles in 10 second buckets
    pub fn response_time_stats() -> Self {
        Self {
            name: "response_time".to_string(),
            mapping: FieldMapping::new(&["serverTimestamp", "timestamp"], TimestampFallback::ExtractionTime)
                .metric(
                    "response_time",
                    &["timings.responseTime", "responseTime", "avgResponseTime"],
                    Some(0.0),
                    InvalidValuePolicy::CoerceZero,
                ),
            window: WindowConfig::new(5 * MINUTE_MS, 2_000, Some(10 * SECOND_MS)),
            dedup: DedupPolicy::None,
            categories: CategoryOrder::Open,
            eviction_interval_ms: 5_000,
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "page_load" => Some(Self::page_load_trend()),
            "traffic" => Some(Self::traffic_trend()),
            "http_status" => Some(Self::http_status_distribution()),
            "device_performance" => Some(Self::device_performance()),
            "response_time" => Some(Self::response_time_stats()),
            _ => None,
        }
    }

    pub fn all() -> [StreamProfile; 5] {
        [
            Self::page_load_trend(),
            Self::traffic_trend(),
            Self::http_status_distribution(),
            Self::device_performance(),
            Self::response_time_stats(),
        ]
    }
}
