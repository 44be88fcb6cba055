//! Integration tests for MetricEngine
//!
//! Exercise the engine end to end through its public surface:
//! - Eviction boundary under the scheduler (paused Tokio clock)
//! - Category aggregation through the device-performance preset
//! - Drop-during-hydration, hydration idempotence and retry after failure
//! - Alert de-duplication and re-arm on reconfiguration
//! - Window and count-cap invariants under a long ingestion run

#[cfg(test)]
mod engine_integration_tests {
    use async_trait::async_trait;
    use metricflow::pipeline::{
        snapshot::StaticSnapshotSource, CategoryOrder, DedupPolicy, FieldMapping, FileSnapshotSource,
        HydrateError, HydrationState, InvalidValuePolicy, MetricEngine, RawSnapshotRow, RuleSet,
        SnapshotSource, StreamProfile, ThresholdRule, WindowConfig,
    };
    use metricflow::pipeline::extractor::TimestampFallback;
    use serde_json::json;
    use std::io::Write;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;
    use tokio::time::Duration;

    fn engine_with_clock(profile: StreamProfile, start: i64) -> (Arc<MetricEngine>, Arc<AtomicI64>) {
        let clock = Arc::new(AtomicI64::new(start));
        let reader = clock.clone();
        let engine = MetricEngine::new_with_timestamp_fn(profile, Box::new(move || reader.load(Ordering::SeqCst)))
            .unwrap();
        (Arc::new(engine), clock)
    }

    fn latency_profile(window_ms: i64, max_points: usize) -> StreamProfile {
        StreamProfile {
            name: "latency".to_string(),
            mapping: FieldMapping::new(&["timestamp"], TimestampFallback::Reject).metric(
                "latency",
                &["latency"],
                None,
                InvalidValuePolicy::Omit,
            ),
            window: WindowConfig::new(window_ms, max_points, Some(1_000)),
            dedup: DedupPolicy::None,
            categories: CategoryOrder::Open,
            eviction_interval_ms: 1_000,
        }
    }

    /// Snapshot source that announces the fetch and waits to be released
    struct GatedSource {
        started: Arc<Notify>,
        release: Arc<Notify>,
        rows: Vec<RawSnapshotRow>,
    }

    #[async_trait]
    impl SnapshotSource for GatedSource {
        async fn fetch(&self) -> Result<Vec<RawSnapshotRow>, HydrateError> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(self.rows.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl SnapshotSource for FailingSource {
        async fn fetch(&self) -> Result<Vec<RawSnapshotRow>, HydrateError> {
            Err(HydrateError::Fetch("upstream returned 503".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_a_eviction_boundary() {
        let (engine, clock) = engine_with_clock(latency_profile(5_000, 0), 2_000);
        engine.ingest(&[
            json!({"timestamp": 0, "latency": 1}),
            json!({"timestamp": 1_000, "latency": 1}),
            json!({"timestamp": 2_000, "latency": 1}),
        ]);

        clock.store(6_000, Ordering::SeqCst);
        engine.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // 6000 - 1000 = 5000 is inside the window, 6000 - 0 is not
        assert_eq!(engine.buffered_timestamps(), vec![1_000, 2_000]);
        engine.stop();
    }

    #[test]
    fn test_scenario_b_category_aggregation() {
        let (engine, _) = engine_with_clock(StreamProfile::device_performance(), 100_000);
        engine.ingest(&[
            json!({"timestamp": 99_000, "hardwareType": "Mobile", "loadTime": 1}),
            json!({"timestamp": 99_100, "hardwareType": "Mobile", "loadTime": 2}),
            json!({"timestamp": 99_200, "hardwareType": "Mobile", "loadTime": 3}),
            json!({"timestamp": 99_300, "hardwareType": "Desktop", "loadTime": 4}),
        ]);

        let summary = engine.get_category_summary();
        let total: usize = summary.iter().map(|row| row.count).sum();
        assert_eq!(total, 4);

        let mobile = summary.iter().find(|row| row.category == "Mobile").unwrap();
        assert_eq!(mobile.count, 3);
        assert!((mobile.percentage_of_total - 75.0).abs() < 1e-9);
        assert!((mobile.avg_by_metric["load_time"] - 2.0).abs() < 1e-9);

        let desktop = summary.iter().find(|row| row.category == "Desktop").unwrap();
        assert_eq!(desktop.count, 1);
        assert!((desktop.percentage_of_total - 25.0).abs() < 1e-9);
        assert!((desktop.avg_by_metric["load_time"] - 4.0).abs() < 1e-9);

        // Same buffer, same order
        assert_eq!(engine.get_category_summary(), summary);
    }

    #[test]
    fn test_user_agent_fallback_classifies_devices() {
        let (engine, _) = engine_with_clock(StreamProfile::device_performance(), 100_000);
        engine.ingest(&[
            json!({"timestamp": 99_000, "loadTime": 800,
                   "userAgent": "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148"}),
            json!({"timestamp": 99_100, "loadTime": 900, "userAgent": "Mozilla/5.0 (Windows NT 10.0; Win64; x64)"}),
            json!({"timestamp": 99_200, "loadTime": 700}),
        ]);

        let categories: Vec<String> = engine
            .get_category_summary()
            .into_iter()
            .map(|row| row.category)
            .collect();
        assert_eq!(categories, vec!["Desktop", "Mobile", "Unknown"]);
    }

    #[test]
    fn test_http_status_summary_has_fixed_rows() {
        let (engine, _) = engine_with_clock(StreamProfile::http_status_distribution(), 100_000);
        engine.ingest(&[
            json!({"timestamp": 99_000, "statusCode": 200}),
            json!({"timestamp": 99_100, "statusCode": 204}),
            json!({"timestamp": 99_200, "statusCode": 503}),
            json!({"timestamp": 99_300, "statusCode": 200}),
        ]);

        let summary = engine.get_category_summary();
        let rows: Vec<(&str, usize)> = summary.iter().map(|r| (r.category.as_str(), r.count)).collect();
        assert_eq!(rows, vec![("2xx", 3), ("3xx", 0), ("4xx", 0), ("5xx", 1)]);

        let percentages: f64 = summary.iter().map(|r| r.percentage_of_total).sum();
        assert!((percentages - 100.0).abs() < 1e-6 * summary.len() as f64);
    }

    #[test]
    fn test_response_time_percentiles() {
        let (engine, _) = engine_with_clock(StreamProfile::response_time_stats(), 30_000);
        let batch: Vec<_> = (1..=20)
            .map(|v| json!({"timestamp": 20_000 + v, "timings": {"responseTime": v}}))
            .collect();
        engine.ingest(&batch);

        let series = engine.get_series();
        assert_eq!(series.len(), 1);
        let stats = series[0].stats("response_time").unwrap();
        assert_eq!(series[0].bucket_start_ms, 20_000);
        assert_eq!(stats.count, 20);
        assert_eq!(stats.p95, 19.0);
        assert_eq!(stats.p99, 20.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 20.0);
    }

    #[tokio::test]
    async fn test_scenario_c_drop_during_hydration() {
        let (engine, _) = engine_with_clock(latency_profile(60_000, 0), 10_000);
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let source = GatedSource {
            started: started.clone(),
            release: release.clone(),
            rows: vec![json!({"timestamp": 1_000, "latency": 5}), json!({"timestamp": 2_000, "latency": 6})],
        };

        let live = async {
            started.notified().await;
            assert_eq!(engine.state(), HydrationState::Hydrating);
            let outcome = engine.ingest(&[json!({"timestamp": 9_000, "latency": 7})]);
            release.notify_one();
            outcome
        };

        let (hydrated, outcome) = tokio::join!(engine.hydrate_from(&source), live);

        assert!(hydrated.unwrap());
        assert!(outcome.is_dropped());
        assert_eq!(engine.buffered_timestamps(), vec![1_000, 2_000]);
        assert_eq!(engine.stats().batches_dropped, 1);

        // Live again once hydration completed
        assert!(!engine.ingest(&[json!({"timestamp": 9_000, "latency": 7})]).is_dropped());
        assert_eq!(engine.get_total_count(), 3);
    }

    #[tokio::test]
    async fn test_hydration_idempotence() {
        let (engine, _) = engine_with_clock(latency_profile(60_000, 0), 10_000);
        let first = StaticSnapshotSource::new(vec![json!({"timestamp": 1_000, "latency": 5})]);
        let second = StaticSnapshotSource::new(vec![
            json!({"timestamp": 3_000, "latency": 5}),
            json!({"timestamp": 4_000, "latency": 5}),
        ]);

        assert!(engine.hydrate_from(&first).await.unwrap());
        let after_first = engine.buffered_timestamps();

        assert!(!engine.hydrate_from(&second).await.unwrap());
        assert!(!engine.hydrate(&[json!({"timestamp": 5_000, "latency": 1})]));
        assert_eq!(engine.buffered_timestamps(), after_first);
    }

    #[tokio::test]
    async fn test_failed_hydration_can_retry() {
        let (engine, _) = engine_with_clock(latency_profile(60_000, 0), 10_000);

        let result = engine.hydrate_from(&FailingSource).await;
        assert!(matches!(result, Err(HydrateError::Fetch(_))));
        assert_eq!(engine.state(), HydrationState::Empty);

        // Not hydrating any more, so live data is accepted
        assert!(!engine.ingest(&[json!({"timestamp": 9_000, "latency": 1})]).is_dropped());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"timestamp": 1000, "latency": 4}}]"#).unwrap();
        assert!(engine.hydrate_from(&FileSnapshotSource::new(file.path())).await.unwrap());

        assert_eq!(engine.state(), HydrationState::Hydrated);
        assert_eq!(engine.buffered_timestamps(), vec![1_000, 9_000]);
    }

    #[tokio::test]
    async fn test_cancelled_hydration_resets_state() {
        let (engine, _) = engine_with_clock(latency_profile(60_000, 0), 10_000);
        let source = GatedSource {
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            rows: Vec::new(),
        };

        let result = tokio::time::timeout(Duration::from_millis(20), engine.hydrate_from(&source)).await;
        assert!(result.is_err());

        assert_eq!(engine.state(), HydrationState::Empty);
        assert!(engine.hydrate(&[json!({"timestamp": 1_000, "latency": 1})]));
    }

    #[test]
    fn test_alert_deduplication_and_rearm() {
        let (engine, _) = engine_with_clock(latency_profile(60_000, 0), 10_000);
        engine
            .set_thresholds(RuleSet::new(vec![ThresholdRule::new("latency", 0.0, 1_000.0)]))
            .unwrap();

        let alerts = Arc::new(Mutex::new(Vec::new()));
        let sink = alerts.clone();
        engine.on_alert(move |alert| sink.lock().unwrap().push(alert.clone()));

        let spike = json!({"timestamp": 5_000, "latency": 1_500});
        engine.ingest(&[spike.clone()]);
        engine.ingest(&[spike.clone()]);
        assert_eq!(alerts.lock().unwrap().len(), 1);

        // Identical rules keep the ledger
        engine
            .set_thresholds(RuleSet::new(vec![ThresholdRule::new("latency", 0.0, 1_000.0)]))
            .unwrap();
        engine.ingest(&[spike.clone()]);
        assert_eq!(alerts.lock().unwrap().len(), 1);

        engine
            .set_thresholds(RuleSet::new(vec![ThresholdRule::new("latency", 0.0, 1_200.0)]))
            .unwrap();
        engine.ingest(&[spike]);

        let alerts = alerts.lock().unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[1].bound, 1_200.0);
        assert_eq!(alerts[1].to_string(), "latency = 1500.000 is above 1200.000 at 5000");
    }

    #[test]
    fn test_tick_forgets_alerts_for_evicted_points() {
        let (engine, clock) = engine_with_clock(latency_profile(5_000, 0), 1_000);
        engine
            .set_thresholds(RuleSet::new(vec![ThresholdRule::new("latency", 0.0, 100.0)]))
            .unwrap();

        let alerts = Arc::new(Mutex::new(Vec::new()));
        let sink = alerts.clone();
        engine.on_alert(move |alert| sink.lock().unwrap().push(alert.clone()));

        let spike = json!({"timestamp": 1_000, "latency": 500});
        engine.ingest(&[spike.clone()]);
        assert_eq!(alerts.lock().unwrap().len(), 1);

        clock.store(7_000, Ordering::SeqCst);
        assert_eq!(engine.tick().by_time, 1);
        assert_eq!(engine.get_total_count(), 0);

        // Widening the window lets the same point back in as a new arrival
        engine.set_window(WindowConfig::new(60_000, 0, Some(1_000))).unwrap();
        let outcome = engine.ingest(&[spike]);

        assert_eq!(outcome.alerts().len(), 1);
        assert_eq!(alerts.lock().unwrap().len(), 2);
        assert_eq!(engine.stats().alerts_emitted, 2);
    }

    #[test]
    fn test_window_and_count_invariants_hold() {
        let window_ms = 5_000;
        let max_points = 50;
        let (engine, clock) = engine_with_clock(latency_profile(window_ms, max_points), 0);

        // Deterministic jittered arrivals, some late and out of order
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for step in 0..400i64 {
            let now = step * 100;
            clock.store(now, Ordering::SeqCst);

            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let jitter = (seed % 8_000) as i64;

            engine.ingest(&[json!({"timestamp": now - jitter, "latency": step})]);
            if step % 7 == 0 {
                engine.tick();
            }

            let timestamps = engine.buffered_timestamps();
            assert!(timestamps.len() <= max_points);
            assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));
            assert!(timestamps.iter().all(|ts| now - ts <= window_ms));
        }
    }

    #[test]
    fn test_traffic_trend_keeps_latest_bucket_delivery() {
        let (engine, _) = engine_with_clock(StreamProfile::traffic_trend(), 600_000);
        engine.ingest(&[
            json!({"bucketStart": 540_000, "requestCount": 10}),
            json!({"bucketStart": 480_000, "requestCount": 4}),
        ]);
        engine.ingest(&[json!({"bucketStart": 540_000, "requestCount": 12})]);

        let series = engine.get_series();
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].stats("requests").unwrap().avg, 12.0);
        assert_eq!(engine.get_total_count(), 2);
    }
}
