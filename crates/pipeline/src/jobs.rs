//! Decoupled per-(pair, exchange) jobs
//!
//! Each exchange runs its own fetch loop at its own cadence and writes every
//! reading into a keyed slot. A separate aggregation loop reads the fresh
//! slots of each pair and tracks their simple average. One exchange failing
//! never forces a refetch from the others.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pricehub_aggregator::average_price;
use pricehub_core::{ExchangeId, PricePoint, TradingPair};
use pricehub_price_feed::{
    Exchange, ExchangeClient, ExchangeRegistry, SlotStore, DEFAULT_HEALTH_BUDGET,
};

use crate::store::PriceStore;
use crate::tracker::{ChangeTracker, TrackerOutcome};

#[derive(Debug, Clone)]
pub struct JobSchedule {
    /// Default fetch cadence
    pub fetch_interval: Duration,
    /// Per-exchange overrides of the fetch cadence
    pub exchange_intervals: BTreeMap<ExchangeId, Duration>,
    /// How often slots are aggregated
    pub aggregate_interval: Duration,
}

impl JobSchedule {
    pub fn interval_for(&self, exchange: ExchangeId) -> Duration {
        self.exchange_intervals
            .get(&exchange)
            .copied()
            .unwrap_or(self.fetch_interval)
    }
}

pub struct JobRunner<C = Exchange> {
    registry: Arc<ExchangeRegistry<C>>,
    slots: Arc<SlotStore>,
    store: Arc<dyn PriceStore>,
    tracker: Arc<ChangeTracker>,
    pairs: Vec<TradingPair>,
    schedule: JobSchedule,
}

impl<C: ExchangeClient + 'static> JobRunner<C> {
    pub fn new(
        registry: Arc<ExchangeRegistry<C>>,
        slots: Arc<SlotStore>,
        store: Arc<dyn PriceStore>,
        tracker: Arc<ChangeTracker>,
        pairs: Vec<TradingPair>,
        schedule: JobSchedule,
    ) -> Self {
        Self {
            registry,
            slots,
            store,
            tracker,
            pairs,
            schedule,
        }
    }

    pub fn slots(&self) -> &Arc<SlotStore> {
        &self.slots
    }

    /// One (pair, exchange) unit of work. Returns whether a slot was written.
    pub async fn run_fetch_job(&self, client: &C, pair: &str) -> bool {
        let exchange = client.id();

        match client.get_price(pair).await {
            Ok(point) => {
                self.registry.record_attempt(exchange, true);
                if !point.is_valid || !PricePoint::check_valid(point.price, point.volume) {
                    debug!(%exchange, symbol = pair, price = point.price, "discarding invalid reading");
                    return false;
                }
                if let Err(err) = self.store.upsert_price_point(pair, exchange, &point).await {
                    warn!(%exchange, symbol = pair, error = %err, "failed to persist price point");
                }
                self.slots.put_point(point)
            }
            Err(err) => {
                self.registry.record_attempt(exchange, false);
                warn!(%exchange, symbol = pair, error = %err, "fetch job failed");
                false
            }
        }
    }

    /// Fetch every supported active pair from one exchange
    pub async fn run_exchange_jobs(&self, exchange: ExchangeId) -> usize {
        let Some(client) = self.registry.client(exchange) else {
            return 0;
        };

        let jobs = self
            .pairs
            .iter()
            .filter(|p| p.is_active && client.is_symbol_supported(&p.symbol))
            .map(|p| self.run_fetch_job(&client, &p.symbol));

        join_all(jobs).await.into_iter().filter(|ok| *ok).count()
    }

    /// Average the fresh slots of one pair and hand it to the tracker.
    /// `None` when no exchange has a fresh reading.
    pub async fn aggregate_pair(&self, pair: &str) -> Option<TrackerOutcome> {
        let slots = self.slots.collect_pair(pair);
        let sources: BTreeMap<ExchangeId, f64> = slots.iter().map(|(e, s)| (*e, s.price)).collect();

        let Some(average) = average_price(sources.values().copied()) else {
            debug!(symbol = pair, "no fresh slots to aggregate");
            return None;
        };

        Some(self.tracker.apply(pair, average, sources).await)
    }

    pub async fn aggregate_all(&self) -> usize {
        let mut aggregated = 0;
        for pair in self.pairs.iter().filter(|p| p.is_active) {
            if self.aggregate_pair(&pair.symbol).await.is_some() {
                aggregated += 1;
            }
        }

        let evicted = self.slots.cleanup();
        if evicted > 0 {
            debug!(evicted, "evicted stale price slots");
        }
        aggregated
    }

    /// Start one fetch loop per registered exchange plus the aggregation loop
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = self
            .registry
            .clients()
            .map(|client| client.id())
            .collect::<Vec<_>>()
            .into_iter()
            .map(|exchange| {
                let runner = Arc::clone(&self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { runner.exchange_loop(exchange, shutdown).await })
            })
            .collect();

        let runner = Arc::clone(&self);
        handles.push(tokio::spawn(async move { runner.aggregate_loop(shutdown).await }));
        handles
    }

    async fn exchange_loop(&self, exchange: ExchangeId, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.schedule.interval_for(exchange));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(%exchange, interval = ?self.schedule.interval_for(exchange), "fetch job loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let healthy = self
                        .registry
                        .status(exchange)
                        .map_or(false, |s| s.is_healthy());
                    if !healthy {
                        self.registry.refresh_client_health(exchange, DEFAULT_HEALTH_BUDGET).await;
                        continue;
                    }
                    let written = self.run_exchange_jobs(exchange).await;
                    debug!(%exchange, written, "fetch jobs complete");
                }
                _ = shutdown.changed() => break,
            }
        }

        info!(%exchange, "fetch job loop stopped");
    }

    async fn aggregate_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.schedule.aggregate_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let aggregated = self.aggregate_all().await;
                    debug!(aggregated, "slot aggregation complete");
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

impl<C> std::fmt::Debug for JobRunner<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("pairs", &self.pairs.len())
            .field("schedule", &self.schedule)
            .finish()
    }
}
