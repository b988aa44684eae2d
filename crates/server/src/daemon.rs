//! Wires the feeds, pipeline and publisher together and runs until shutdown

use anyhow::Context;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pricehub_core::{AggregatorSettings, Clock, ExchangeId, RunMode, SystemClock, PRICE_UPDATED_EVENT};
use pricehub_price_feed::{build_exchanges, ExchangeRegistry, RequestExecutor, SlotStore};
use pricehub_pipeline::{
    AggregationService, BroadcastPublisher, ChangeTracker, CycleRunner, FetchScheduler, JobRunner,
    JobSchedule, MemoryStore, PriceStore, UpdatePublisher,
};

pub struct Daemon {
    settings: AggregatorSettings,
    clock: Arc<dyn Clock>,
    publisher: Arc<BroadcastPublisher>,
    store: Arc<MemoryStore>,
}

impl Daemon {
    pub fn new(settings: AggregatorSettings) -> Self {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: AggregatorSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            publisher: Arc::new(BroadcastPublisher::default()),
            store: Arc::new(MemoryStore::new()),
        }
    }

    pub fn publisher(&self) -> &Arc<BroadcastPublisher> {
        &self.publisher
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Start up and run until `shutdown` flips. Fails only when no exchange
    /// is reachable at startup or the configuration is unusable.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let pairs = self.settings.trading_pairs().context("invalid trading pairs")?;
        let executor = Arc::new(
            RequestExecutor::new(&self.settings.http(), Arc::clone(&self.clock))
                .context("failed to build HTTP client")?,
        );

        let exchanges = build_exchanges(&self.settings, &pairs, executor);
        let registry = Arc::new(ExchangeRegistry::initialize(exchanges, Arc::clone(&self.clock)).await?);

        let store: Arc<dyn PriceStore> = self.store.clone();
        let publisher: Arc<dyn UpdatePublisher> = self.publisher.clone();
        let tracker = ChangeTracker::new(Arc::clone(&store), Arc::clone(&publisher), Arc::clone(&self.clock))
            .publish_unchanged(self.settings.publish_unchanged);

        let logger = spawn_update_logger(&self.publisher, shutdown.clone());

        info!(
            mode = ?self.settings.mode,
            pairs = pairs.len(),
            exchanges = registry.len(),
            "daemon started"
        );

        match self.settings.mode {
            RunMode::Cycle => {
                let scheduler = FetchScheduler::new(
                    registry,
                    self.settings.max_concurrency,
                    self.settings.global_timeout(),
                );
                let service = Arc::new(AggregationService::new(
                    scheduler,
                    store,
                    publisher,
                    tracker,
                    pairs,
                    Arc::clone(&self.clock),
                ));

                let cycles = CycleRunner::new(service, self.settings.fetch_interval(), self.settings.min_delay())
                    .run(shutdown)
                    .await;
                info!(cycles, "aggregation loop stopped");
            }
            RunMode::Jobs => {
                let schedule = job_schedule(&self.settings);
                let slots = Arc::new(SlotStore::new(self.settings.slot_ttl(), Arc::clone(&self.clock)));
                let runner = Arc::new(JobRunner::new(
                    registry,
                    slots,
                    store,
                    Arc::new(tracker),
                    pairs,
                    schedule,
                ));

                for handle in runner.spawn(shutdown) {
                    if let Err(e) = handle.await {
                        warn!(error = %e, "job task ended abnormally");
                    }
                }
                info!("fetch jobs stopped");
            }
        }

        logger.abort();
        Ok(())
    }
}

/// Per-exchange cadences for jobs mode. Unknown exchange names are ignored.
pub fn job_schedule(settings: &AggregatorSettings) -> JobSchedule {
    let mut exchange_intervals = BTreeMap::new();
    for name in settings.exchange_intervals.keys() {
        match name.parse::<ExchangeId>() {
            Ok(id) => {
                exchange_intervals.insert(id, settings.interval_for(id));
            }
            Err(_) => warn!(exchange = %name, "ignoring interval for unknown exchange"),
        }
    }

    JobSchedule {
        fetch_interval: settings.fetch_interval(),
        exchange_intervals,
        aggregate_interval: settings.fetch_interval(),
    }
}

/// Keeps one subscriber on the channel and logs every price update
fn spawn_update_logger(publisher: &BroadcastPublisher, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let mut events = publisher.stream();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(Ok(event)) if event.event == PRICE_UPDATED_EVENT => {
                        info!(
                            pair = %event.data["pair"].as_str().unwrap_or_default(),
                            price = event.data["price"].as_f64().unwrap_or_default(),
                            change_pct = event.data["price_change_percentage"].as_f64().unwrap_or_default(),
                            "price updated"
                        );
                    }
                    Some(Ok(event)) => debug!(event = event.event, "event published"),
                    Some(Err(e)) => warn!(error = %e, "update logger lagged"),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }
    })
}

/// Flip the shutdown flag after `delay`; used by tests and bounded runs
pub fn shutdown_after(delay: Duration) -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = tx.send(true);
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_job_schedule_from_settings() {
        let mut settings = AggregatorSettings {
            fetch_interval: 5,
            ..Default::default()
        };
        settings.exchange_intervals.insert("huobi".into(), 20);
        settings.exchange_intervals.insert("kraken".into(), 1);
        settings.exchange_intervals.insert("mexc".into(), 0);

        let schedule = job_schedule(&settings);
        assert_eq!(schedule.interval_for(ExchangeId::Huobi), Duration::from_secs(20));
        assert_eq!(schedule.interval_for(ExchangeId::Mexc), Duration::from_secs(5));
        assert_eq!(schedule.interval_for(ExchangeId::Binance), Duration::from_secs(5));
        assert_eq!(schedule.aggregate_interval, Duration::from_secs(5));
        assert_eq!(schedule.exchange_intervals.len(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_exchanges_fail_startup() {
        let mut settings = AggregatorSettings {
            exchanges: vec!["binance".into()],
            request_timeout: 1,
            retry_attempts: 1,
            retry_delay_ms: 0,
            ..Default::default()
        };
        settings.exchange_endpoints.insert(
            "binance".into(),
            pricehub_core::ExchangeEndpoint {
                base_url: Some("http://127.0.0.1:9".into()),
                ..Default::default()
            },
        );

        let daemon = Daemon::new(settings);
        let result = daemon.run(shutdown_after(Duration::from_secs(30))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_update_logger_exits_on_shutdown() {
        let publisher = BroadcastPublisher::default();
        let (tx, rx) = watch::channel(false);
        let handle = spawn_update_logger(&publisher, rx);

        tx.send(true).unwrap();
        tokio_test::assert_ok!(handle.await);
    }
}
