//! One full fetch, aggregate, persist and publish pass

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use pricehub_aggregator::combine;
use pricehub_core::{
    normalize_symbol, AggregateSnapshot, Clock, ExchangePrices, PricesBatchPayload, TradingPair,
};
use pricehub_price_feed::{Exchange, ExchangeClient, ExchangeRegistry};

use crate::publisher::UpdatePublisher;
use crate::scheduler::{FetchFailure, FetchScheduler};
use crate::store::PriceStore;
use crate::tracker::ChangeTracker;

/// Summary of one aggregation cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub pairs_processed: usize,
    pub pairs_skipped: Vec<String>,
    pub errors: Vec<FetchFailure>,
    /// Pairs whose cycle data or state could not be stored
    pub persistence_failures: Vec<String>,
    pub published: usize,
    pub timed_out: bool,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            started_at,
            elapsed: Duration::ZERO,
            pairs_processed: 0,
            pairs_skipped: vec![],
            errors: vec![],
            persistence_failures: vec![],
            published: 0,
            timed_out: false,
        }
    }
}

pub struct AggregationService<C = Exchange> {
    scheduler: FetchScheduler<C>,
    store: Arc<dyn PriceStore>,
    publisher: Arc<dyn UpdatePublisher>,
    tracker: ChangeTracker,
    pairs: Vec<TradingPair>,
    clock: Arc<dyn Clock>,
}

impl<C: ExchangeClient> AggregationService<C> {
    pub fn new(
        scheduler: FetchScheduler<C>,
        store: Arc<dyn PriceStore>,
        publisher: Arc<dyn UpdatePublisher>,
        tracker: ChangeTracker,
        pairs: Vec<TradingPair>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            scheduler,
            store,
            publisher,
            tracker,
            pairs,
            clock,
        }
    }

    pub fn registry(&self) -> &Arc<ExchangeRegistry<C>> {
        self.scheduler.registry()
    }

    pub fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    pub fn pairs(&self) -> &[TradingPair] {
        &self.pairs
    }

    /// Fetch every active pair, aggregate, persist and publish.
    ///
    /// Never fails: exchange errors, storage and publish failures are all
    /// folded into the report.
    pub async fn run_aggregation_cycle(&self) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::new(self.clock.now());

        // Health checks and fetches share one budget. Checks get at most half
        // of it so a hung exchange cannot starve the fetch.
        let budget = self.scheduler.global_timeout();
        let deadline = started + budget;

        let healthy = self.registry().refresh_health_within(budget / 2).await;
        if healthy.is_empty() {
            warn!("no healthy exchanges this cycle, skipping");
            report.pairs_skipped = self.active_symbols();
            report.elapsed = started.elapsed();
            return report;
        }

        let outcome = self.scheduler.fetch_all_until(&self.pairs, deadline).await;
        report.timed_out = outcome.timed_out;
        report.errors = outcome.failures;
        report.pairs_skipped = outcome.skipped;
        report.pairs_skipped.extend(outcome.abandoned);

        let calculated_at = self.clock.now();
        for (pair, prices) in &outcome.prices {
            let snapshot = combine(prices, calculated_at);
            if snapshot.is_empty() {
                report.pairs_skipped.push(pair.clone());
                continue;
            }

            if let Err(err) = self.store.record_pair_cycle(pair, prices, &snapshot).await {
                error!(pair = %pair, error = %err, "failed to persist cycle data");
                report.persistence_failures.push(pair.clone());
            }

            let sources: BTreeMap<_, f64> = prices.iter().map(|(e, p)| (*e, p.price)).collect();
            let tracked = self.tracker.apply(pair, snapshot.average_price, sources).await;
            if tracked.persist_error.is_some() && !report.persistence_failures.contains(pair) {
                report.persistence_failures.push(pair.clone());
            }
            if tracked.published {
                report.published += 1;
            }

            report.pairs_processed += 1;
        }

        let batch = PricesBatchPayload::from_prices(&outcome.prices, calculated_at);
        if !batch.is_empty() {
            if let Err(err) = self.publisher.publish_batch(&batch).await {
                warn!(error = %err, "failed to publish price batch");
            }
        }

        report.elapsed = started.elapsed();
        info!(
            cycle_id = %report.cycle_id,
            processed = report.pairs_processed,
            skipped = report.pairs_skipped.len(),
            errors = report.errors.len(),
            persistence_failures = report.persistence_failures.len(),
            timed_out = report.timed_out,
            elapsed = ?report.elapsed,
            "aggregation cycle complete"
        );

        report
    }

    /// On-demand refresh of a single pair from every healthy exchange.
    /// Nothing is persisted or published.
    pub async fn fetch_price_for_pair(&self, symbol: &str) -> ExchangePrices {
        let clients = self.registry().healthy_clients();
        self.scheduler.fetch_pair(&normalize_symbol(symbol), &clients).await.prices
    }

    /// Pure aggregation, exposed for read-side reuse
    pub fn calculate_aggregate_statistics(&self, prices: &ExchangePrices) -> AggregateSnapshot {
        combine(prices, self.clock.now())
    }

    fn active_symbols(&self) -> Vec<String> {
        self.pairs
            .iter()
            .filter(|p| p.is_active)
            .map(|p| p.symbol.clone())
            .collect()
    }
}

impl<C> std::fmt::Debug for AggregationService<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationService")
            .field("pairs", &self.pairs.len())
            .field("tracker", &self.tracker)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::BroadcastPublisher;
    use crate::store::MemoryStore;
    use pricehub_core::{ExchangeErrorKind, ExchangeId, ManualClock, PRICES_BATCH_EVENT, PRICE_UPDATED_EVENT};
    use pricehub_price_feed::stub::StubExchange;

    struct Harness {
        service: AggregationService<StubExchange>,
        store: Arc<MemoryStore>,
        publisher: Arc<BroadcastPublisher>,
    }

    async fn harness(clients: Vec<StubExchange>, pairs: &[&str]) -> Harness {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let registry = Arc::new(ExchangeRegistry::initialize(clients, clock.clone()).await.unwrap());
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(BroadcastPublisher::default());
        let tracker = ChangeTracker::new(store.clone(), publisher.clone(), clock.clone());

        let service = AggregationService::new(
            FetchScheduler::new(registry, 16, Duration::from_secs(10)),
            store.clone(),
            publisher.clone(),
            tracker,
            pairs.iter().map(|p| TradingPair::parse(p).unwrap()).collect(),
            clock,
        );

        Harness {
            service,
            store,
            publisher,
        }
    }

    #[tokio::test]
    async fn test_cycle_persists_and_publishes() {
        let h = harness(
            vec![
                StubExchange::new(ExchangeId::Binance, &["BTCUSDT", "ETHBTC"])
                    .with_price("BTCUSDT", 100.0, 3.0)
                    .with_price("ETHBTC", 0.05, 1.0),
                StubExchange::new(ExchangeId::Mexc, &["BTCUSDT", "ETHBTC"])
                    .with_price("BTCUSDT", 200.0, 1.0)
                    .with_failure("ETHBTC", ExchangeErrorKind::Timeout),
            ],
            &["BTCUSDT", "ETHBTC"],
        )
        .await;
        let mut rx = h.publisher.subscribe();

        let report = h.service.run_aggregation_cycle().await;

        assert_eq!(report.pairs_processed, 2);
        assert!(report.pairs_skipped.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].exchange, ExchangeId::Mexc);
        assert_eq!(report.published, 2);
        assert!(report.persistence_failures.is_empty());

        let latest = h.store.latest_snapshot("BTCUSDT").await.unwrap().unwrap();
        assert!((latest.snapshot.average_price - 125.0).abs() < 1e-9);
        assert_eq!(h.store.price_points("BTCUSDT").len(), 2);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event.event);
        }
        assert_eq!(
            events,
            vec![PRICE_UPDATED_EVENT, PRICE_UPDATED_EVENT, PRICES_BATCH_EVENT]
        );
    }

    #[tokio::test]
    async fn test_second_cycle_tracks_change() {
        let h = harness(
            vec![StubExchange::new(ExchangeId::Huobi, &["BTCUSDT"]).with_price("BTCUSDT", 100.0, 1.0)],
            &["BTCUSDT"],
        )
        .await;
        let _rx = h.publisher.subscribe();

        h.service.run_aggregation_cycle().await;
        h.service
            .registry()
            .client(ExchangeId::Huobi)
            .unwrap()
            .set_price("BTCUSDT", 90.0, 1.0);
        h.service.run_aggregation_cycle().await;

        let payload = h.publisher.latest("BTCUSDT").unwrap();
        assert_eq!(payload.price, 90.0);
        assert_eq!(payload.previous_price, 100.0);
        assert_eq!(payload.price_change, -10.0);
        assert_eq!(payload.price_change_percentage, -10.0);
        assert_eq!(payload.is_increasing, Some(false));
        assert_eq!(h.store.snapshot_count("BTCUSDT"), 2);
    }

    #[tokio::test]
    async fn test_all_failed_pair_is_skipped_without_publish() {
        let h = harness(
            vec![
                StubExchange::new(ExchangeId::Binance, &["BTCUSDC"])
                    .with_failure("BTCUSDC", ExchangeErrorKind::HttpStatus(500)),
                StubExchange::new(ExchangeId::Mexc, &["BTCUSDC"])
                    .with_failure("BTCUSDC", ExchangeErrorKind::Transport("reset".into())),
            ],
            &["BTCUSDC"],
        )
        .await;
        let _rx = h.publisher.subscribe();

        let report = h.service.run_aggregation_cycle().await;
        assert_eq!(report.pairs_processed, 0);
        assert_eq!(report.pairs_skipped, vec!["BTCUSDC"]);
        assert_eq!(report.published, 0);
        assert!(h.publisher.latest("BTCUSDC").is_none());
        assert!(h.publisher.latest_batch().is_none());
        assert_eq!(h.store.snapshot_count("BTCUSDC"), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_flagged_but_published() {
        let h = harness(
            vec![StubExchange::new(ExchangeId::Binance, &["BTCUSDT"]).with_price("BTCUSDT", 100.0, 1.0)],
            &["BTCUSDT"],
        )
        .await;
        let _rx = h.publisher.subscribe();
        h.store.set_fail_writes(true);

        let report = h.service.run_aggregation_cycle().await;
        assert_eq!(report.persistence_failures, vec!["BTCUSDT"]);
        assert_eq!(report.published, 1);
        assert_eq!(h.publisher.latest("BTCUSDT").unwrap().price, 100.0);
    }

    #[tokio::test]
    async fn test_cycle_skips_everything_when_no_exchange_healthy() {
        let h = harness(
            vec![StubExchange::new(ExchangeId::Binance, &["BTCUSDT"]).with_price("BTCUSDT", 100.0, 1.0)],
            &["BTCUSDT", "ETHBTC"],
        )
        .await;
        h.service.registry().client(ExchangeId::Binance).unwrap().set_healthy(false);

        let report = h.service.run_aggregation_cycle().await;
        assert_eq!(report.pairs_processed, 0);
        assert_eq!(report.pairs_skipped, vec!["BTCUSDT", "ETHBTC"]);
    }

    #[tokio::test]
    async fn test_ethbtc_snapshot_uses_only_surviving_exchange() {
        let h = harness(
            vec![
                StubExchange::new(ExchangeId::Binance, &["ETHBTC"]).with_price("ETHBTC", 0.0525, 40.0),
                StubExchange::new(ExchangeId::Mexc, &["ETHBTC"])
                    .with_failure("ETHBTC", ExchangeErrorKind::HttpStatus(502)),
                StubExchange::new(ExchangeId::Huobi, &["ETHBTC"])
                    .with_failure("ETHBTC", ExchangeErrorKind::Timeout),
            ],
            &["ETHBTC"],
        )
        .await;
        let _rx = h.publisher.subscribe();

        let report = h.service.run_aggregation_cycle().await;
        assert_eq!(report.pairs_processed, 1);
        assert_eq!(report.errors.len(), 2);

        let stored = h.store.latest_snapshot("ETHBTC").await.unwrap().unwrap();
        assert_eq!(stored.snapshot.exchange_ids, vec![ExchangeId::Binance]);
        assert_eq!(stored.snapshot.number_of_sources, 1);
        assert_eq!(stored.snapshot.average_price, 0.0525);
        assert_eq!(
            h.publisher.latest("ETHBTC").unwrap().exchanges,
            vec!["binance".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_health_check_stays_within_cycle_budget() {
        let h = harness(
            vec![
                StubExchange::new(ExchangeId::Binance, &["BTCUSDT"]).with_price("BTCUSDT", 100.0, 1.0),
                StubExchange::new(ExchangeId::Mexc, &["BTCUSDT"]).with_price("BTCUSDT", 101.0, 1.0),
            ],
            &["BTCUSDT"],
        )
        .await;
        h.service
            .registry()
            .client(ExchangeId::Mexc)
            .unwrap()
            .set_health_delay(Duration::from_secs(32));

        let started = Instant::now();
        let report = h.service.run_aggregation_cycle().await;

        assert!(started.elapsed() <= Duration::from_secs(10));
        assert!(report.elapsed <= Duration::from_secs(10));
        assert_eq!(report.pairs_processed, 1);
        assert!(!report.timed_out);
        assert!(!h.service.registry().status(ExchangeId::Mexc).unwrap().is_healthy());
        assert_eq!(h.service.registry().client(ExchangeId::Mexc).unwrap().calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_after_health_uses_remaining_budget() {
        let h = harness(
            vec![StubExchange::new(ExchangeId::Binance, &["BTCUSDT"])
                .with_price("BTCUSDT", 100.0, 1.0)
                .with_delay(Duration::from_secs(8))],
            &["BTCUSDT"],
        )
        .await;
        h.service
            .registry()
            .client(ExchangeId::Binance)
            .unwrap()
            .set_health_delay(Duration::from_secs(4));

        let started = Instant::now();
        let report = h.service.run_aggregation_cycle().await;

        // 4s of health checks leave 6s, not a fresh 10s, for the 8s fetch
        assert!(report.timed_out);
        assert_eq!(report.pairs_skipped, vec!["BTCUSDT"]);
        assert!(started.elapsed() <= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_fetch_price_for_pair_has_no_side_effects() {
        let h = harness(
            vec![
                StubExchange::new(ExchangeId::Binance, &["ETHBTC"]).with_price("ETHBTC", 0.05, 2.0),
                StubExchange::new(ExchangeId::Huobi, &["ETHBTC"]).with_price("ETHBTC", 0.06, 2.0),
            ],
            &["ETHBTC"],
        )
        .await;

        let prices = h.service.fetch_price_for_pair("eth-btc").await;
        assert_eq!(prices.len(), 2);

        let snapshot = h.service.calculate_aggregate_statistics(&prices);
        assert!((snapshot.average_price - 0.055).abs() < 1e-12);
        assert_eq!(snapshot.high_price, 0.06);
        assert_eq!(snapshot.low_price, 0.05);

        assert_eq!(h.store.snapshot_count("ETHBTC"), 0);
        assert!(h.publisher.latest("ETHBTC").is_none());
    }
}
