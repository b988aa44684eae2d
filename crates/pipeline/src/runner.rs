//! Self-scheduling cycle loop
//!
//! The next cycle starts `interval` after the previous one started, or
//! `min_delay` after it finished when the cycle overran.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use pricehub_price_feed::ExchangeClient;

use crate::cycle::{AggregationService, CycleReport};

/// Delay before the next cycle
pub fn next_delay(interval: Duration, elapsed: Duration, min_delay: Duration) -> Duration {
    interval.saturating_sub(elapsed).max(min_delay)
}

/// Something that can run one cycle
#[async_trait]
pub trait CycleDriver: Send + Sync {
    async fn run_cycle(&self) -> CycleReport;
}

#[async_trait]
impl<C: ExchangeClient> CycleDriver for AggregationService<C> {
    async fn run_cycle(&self) -> CycleReport {
        self.run_aggregation_cycle().await
    }
}

#[derive(Debug)]
pub struct CycleRunner<D> {
    driver: Arc<D>,
    interval: Duration,
    min_delay: Duration,
}

impl<D: CycleDriver> CycleRunner<D> {
    pub fn new(driver: Arc<D>, interval: Duration, min_delay: Duration) -> Self {
        Self {
            driver,
            interval,
            min_delay,
        }
    }

    /// Run cycles until shutdown is signalled. Returns the number of cycles
    /// run. A cycle in progress is allowed to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut cycles = 0u64;
        info!(interval = ?self.interval, "aggregation loop started");

        loop {
            let started = Instant::now();
            self.driver.run_cycle().await;
            cycles += 1;

            let delay = next_delay(self.interval, started.elapsed(), self.min_delay);
            debug!(delay = ?delay, "next cycle scheduled");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!(cycles, "aggregation loop stopped");
        cycles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;

    /// Driver that takes a fixed time per cycle and records start times
    struct TimedDriver {
        duration: Duration,
        starts: Mutex<Vec<Instant>>,
    }

    #[async_trait]
    impl CycleDriver for TimedDriver {
        async fn run_cycle(&self) -> CycleReport {
            self.starts.lock().push(Instant::now());
            tokio::time::sleep(self.duration).await;
            empty_report()
        }
    }

    fn empty_report() -> CycleReport {
        CycleReport {
            cycle_id: uuid::Uuid::new_v4(),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            pairs_processed: 0,
            pairs_skipped: vec![],
            errors: vec![],
            persistence_failures: vec![],
            published: 0,
            timed_out: false,
        }
    }

    #[test]
    fn test_next_delay() {
        let secs = Duration::from_secs;
        assert_eq!(next_delay(secs(5), secs(2), secs(1)), secs(3));
        assert_eq!(next_delay(secs(5), secs(5), secs(1)), secs(1));
        assert_eq!(next_delay(secs(5), secs(12), secs(1)), secs(1));
        assert_eq!(next_delay(secs(5), Duration::from_millis(4_500), secs(1)), secs(1));
    }

    async fn run_for(driver: Arc<TimedDriver>, interval: Duration, run_time: Duration) -> u64 {
        let (tx, rx) = watch::channel(false);
        let runner = CycleRunner::new(driver, interval, Duration::from_secs(1));

        let handle = tokio::spawn(async move { runner.run(rx).await });
        tokio::time::sleep(run_time).await;
        tx.send(true).unwrap();
        handle.await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_start_on_interval() {
        let driver = Arc::new(TimedDriver {
            duration: Duration::from_secs(2),
            starts: Mutex::new(vec![]),
        });
        let origin = Instant::now();

        let cycles = run_for(driver.clone(), Duration::from_secs(5), Duration::from_secs(16)).await;
        assert_eq!(cycles, 4);

        let offsets: Vec<u64> = driver
            .starts
            .lock()
            .iter()
            .map(|s| s.duration_since(origin).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 5, 10, 15]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_cycle_waits_min_delay() {
        let driver = Arc::new(TimedDriver {
            duration: Duration::from_secs(7),
            starts: Mutex::new(vec![]),
        });
        let origin = Instant::now();

        run_for(driver.clone(), Duration::from_secs(5), Duration::from_secs(17)).await;

        let offsets: Vec<u64> = driver
            .starts
            .lock()
            .iter()
            .map(|s| s.duration_since(origin).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 8, 16]);
    }
}
