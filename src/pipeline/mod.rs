//! # Streaming windowed aggregation pipeline
//!
//! One `MetricEngine` per metric stream. Data flows:
//!
//! ```text
//! snapshot rows ──┐
//!                 ├─> extractor ─> WindowBuffer ─┬─> TimeBucketSeries / CategorySummary
//! live batches ───┘                     │        └─> (queries, on demand)
//!                                       └─> ThresholdMonitor ─> alert sink
//! scheduler tick ─> WindowBuffer::evict (independent of ingestion)
//! ```
//!
//! ## Module Organization
//!
//! - `types` - Point, WindowConfig and the query output shapes
//! - `extractor` - JSON record normalization with declared fallback chains
//! - `windows` - sorted, bounded point buffer
//! - `aggregator` - time-bucket and category strategies
//! - `thresholds` - rule sets and the de-duplicating alert ledger
//! - `scheduler` - periodic eviction task
//! - `engine` - composition root exposing Hydrate/Ingest/Query/Config
//! - `profiles` - presets for each dashboard widget
//! - `snapshot` - historical snapshot sources for hydration
//! - `ingestion` - channel-driven live ingestion task
//! - `config` - environment configuration

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod ingestion;
pub mod profiles;
pub mod scheduler;
pub mod snapshot;
pub mod thresholds;
pub mod types;
pub mod windows;

// Re-export commonly used types
pub use aggregator::{Aggregator, CategoryOrder, CategorySummary, TimeBucketSeries};
pub use config::EngineConfig;
pub use engine::{EngineStats, HydrationState, IngestOutcome, MetricEngine};
pub use error::{EngineError, HydrateError};
pub use extractor::{FieldMapping, InvalidValuePolicy};
pub use profiles::StreamProfile;
pub use snapshot::{FileSnapshotSource, SnapshotSource};
pub use thresholds::{RuleSet, ThresholdRule};
pub use types::{Alert, CategoryRow, Point, RawEvent, RawSnapshotRow, SeriesBucket, WindowConfig};
pub use windows::DedupPolicy;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock engine state, recovering from poisoning instead of propagating it
pub(crate) fn lock_state<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
