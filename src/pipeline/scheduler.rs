//! Periodic eviction independent of ingestion
//!
//! Data must age out even when the live stream goes quiet or disconnects, so
//! eviction runs on its own `tokio::time::interval`. Each run of the task is
//! tagged with an epoch; the tick re-checks the epoch while holding the state
//! lock, and `stop()` bumps it under the same lock. Once `stop()` returns no
//! further tick can mutate the state.

use super::error::EngineError;
use super::lock_state;
use super::windows::EvictionReport;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Clock returning milliseconds since the Unix epoch
pub type NowFn = dyn Fn() -> i64 + Send + Sync;

/// State that can shed expired data on a tick
pub trait Evictable: Send + 'static {
    fn evict_expired(&mut self, now_ms: i64) -> EvictionReport;
}

pub struct EvictionScheduler {
    period: Duration,
    epoch: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl EvictionScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            epoch: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the tick task; `Ok(false)` if it was already running
    pub fn start<T: Evictable>(
        &mut self,
        target: Arc<Mutex<T>>,
        now_fn: Arc<NowFn>,
    ) -> Result<bool, EngineError> {
        if self.is_running() {
            return Ok(false);
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| EngineError::SchedulerUnavailable)?;

        let my_epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let epoch = self.epoch.clone();
        let period = self.period;

        log::info!("⏰ Starting eviction scheduler (interval: {}ms)", period.as_millis());

        self.handle = Some(runtime.spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                timer.tick().await;

                let now = (*now_fn)();
                let report = {
                    let mut state = lock_state(&target);
                    if epoch.load(Ordering::SeqCst) != my_epoch {
                        break;
                    }
                    state.evict_expired(now)
                };

                if report.total() > 0 {
                    log::debug!(
                        "Tick evicted {} points ({} stale, {} over cap)",
                        report.total(),
                        report.by_time,
                        report.by_count
                    );
                }
            }
        }));

        Ok(true)
    }

    /// Cancel the tick task; `false` if it was not running
    pub fn stop<T>(&mut self, target: &Mutex<T>) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };

        {
            let _state = lock_state(target);
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
        handle.abort();

        log::info!("Eviction scheduler stopped");
        true
    }
}

impl Drop for EvictionScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;

    #[derive(Default)]
    struct TickCounter {
        ticks: usize,
        last_now: i64,
    }

    impl Evictable for TickCounter {
        fn evict_expired(&mut self, now_ms: i64) -> EvictionReport {
            self.ticks += 1;
            self.last_now = now_ms;
            EvictionReport::default()
        }
    }

    fn manual_clock(start: i64) -> (Arc<AtomicI64>, Arc<NowFn>) {
        let clock = Arc::new(AtomicI64::new(start));
        let reader = clock.clone();
        let now_fn: Arc<NowFn> = Arc::new(move || reader.load(Ordering::SeqCst));
        (clock, now_fn)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_interval() {
        let target = Arc::new(Mutex::new(TickCounter::default()));
        let (clock, now_fn) = manual_clock(42);
        let mut scheduler = EvictionScheduler::new(Duration::from_millis(1_000));

        assert!(scheduler.start(target.clone(), now_fn).unwrap());
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        {
            let state = target.lock().unwrap();
            // Immediate first tick plus one per elapsed period
            assert_eq!(state.ticks, 3);
            assert_eq!(state.last_now, 42);
        }

        clock.store(99, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(target.lock().unwrap().last_now, 99);

        scheduler.stop(&target);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_idempotent() {
        let target = Arc::new(Mutex::new(TickCounter::default()));
        let (_clock, now_fn) = manual_clock(0);
        let mut scheduler = EvictionScheduler::new(Duration::from_millis(500));

        assert!(scheduler.start(target.clone(), now_fn.clone()).unwrap());
        assert!(!scheduler.start(target.clone(), now_fn).unwrap());
        assert!(scheduler.is_running());

        assert!(scheduler.stop(&target));
        assert!(!scheduler.stop(&target));
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_ticks_after_stop() {
        let target = Arc::new(Mutex::new(TickCounter::default()));
        let (_clock, now_fn) = manual_clock(0);
        let mut scheduler = EvictionScheduler::new(Duration::from_millis(100));

        scheduler.start(target.clone(), now_fn).unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;
        scheduler.stop(&target);

        let ticks_at_stop = target.lock().unwrap().ticks;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(target.lock().unwrap().ticks, ticks_at_stop);
    }

    #[test]
    fn test_start_requires_runtime() {
        let target = Arc::new(Mutex::new(TickCounter::default()));
        let (_clock, now_fn) = manual_clock(0);
        let mut scheduler = EvictionScheduler::new(Duration::from_millis(100));

        let result = scheduler.start(target, now_fn);
        assert!(matches!(result, Err(EngineError::SchedulerUnavailable)));
    }
}
