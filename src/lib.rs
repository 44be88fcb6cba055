//! MetricFlow - windowed metrics aggregation core for dashboard widgets
//!
//! Ingests a one-time historical snapshot plus a live event stream, keeps a
//! bounded time window, and answers time-bucket and category queries while
//! raising de-duplicated threshold alerts. See [`pipeline`] for the layout.

pub mod pipeline;

pub use pipeline::{
    engine::{IngestOutcome, MetricEngine},
    types::{Alert, CategoryRow, Direction, Point, SeriesBucket, WindowConfig},
};
