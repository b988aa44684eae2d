//! Per-pair price change tracking
//!
//! The tracker owns every pair's [`CurrentPriceState`]. Each pair has its own
//! async mutex; the read-modify-write of the state, its persistence and the
//! publish all happen under that lock, so two cycles for the same pair never
//! interleave while different pairs never contend.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use pricehub_core::{Clock, CurrentPriceState, ExchangeId, PublishError, StoreError};

use crate::publisher::UpdatePublisher;
use crate::store::PriceStore;

type PairSlot = Arc<Mutex<Option<CurrentPriceState>>>;

/// Result of one [`ChangeTracker::apply`]
#[derive(Debug, Clone)]
pub struct TrackerOutcome {
    pub state: CurrentPriceState,
    pub published: bool,
    pub persist_error: Option<StoreError>,
    pub publish_error: Option<PublishError>,
}

pub struct ChangeTracker {
    store: Arc<dyn PriceStore>,
    publisher: Arc<dyn UpdatePublisher>,
    clock: Arc<dyn Clock>,
    states: DashMap<String, PairSlot>,
    publish_unchanged: bool,
}

impl ChangeTracker {
    pub fn new(
        store: Arc<dyn PriceStore>,
        publisher: Arc<dyn UpdatePublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            states: DashMap::new(),
            publish_unchanged: true,
        }
    }

    /// Skip publishing when the tracked price did not move
    pub fn publish_unchanged(mut self, publish: bool) -> Self {
        self.publish_unchanged = publish;
        self
    }

    fn slot(&self, pair: &str) -> PairSlot {
        Arc::clone(self.states.entry(pair.to_string()).or_default().value())
    }

    /// Record a new aggregate price for `pair`, persist it and publish it.
    ///
    /// A failed save is reported in the outcome but does not stop the
    /// publish; the in-memory state always advances.
    pub async fn apply(
        &self,
        pair: &str,
        new_price: f64,
        exchange_prices: BTreeMap<ExchangeId, f64>,
    ) -> TrackerOutcome {
        let slot = self.slot(pair);
        let mut guard = slot.lock().await;

        let mut state = match guard.take() {
            Some(state) => state,
            None => self.load(pair).await,
        };

        state.record(new_price, exchange_prices, self.clock.now());

        let persist_error = match self.store.save_current_state(pair, &state).await {
            Ok(id) => {
                state.id = id;
                None
            }
            Err(err) => {
                error!(pair, error = %err, "failed to persist price state");
                Some(err)
            }
        };

        let moved = state.price_change.map_or(true, |c| c != 0.0);
        let mut published = false;
        let mut publish_error = None;

        if moved || self.publish_unchanged {
            match self.publisher.publish_price(&state.payload()).await {
                Ok(()) => published = true,
                Err(err) => {
                    warn!(pair, error = %err, "failed to publish price update");
                    publish_error = Some(err);
                }
            }
        } else {
            debug!(pair, "price unchanged, not publishing");
        }

        *guard = Some(state.clone());

        TrackerOutcome {
            state,
            published,
            persist_error,
            publish_error,
        }
    }

    async fn load(&self, pair: &str) -> CurrentPriceState {
        match self.store.load_current_state(pair).await {
            Ok(Some(state)) => state,
            Ok(None) => CurrentPriceState::new(pair, self.clock.now()),
            Err(err) => {
                warn!(pair, error = %err, "failed to load price state, starting fresh");
                CurrentPriceState::new(pair, self.clock.now())
            }
        }
    }

    /// Last applied state for `pair`, if any this process has seen
    pub async fn current(&self, pair: &str) -> Option<CurrentPriceState> {
        let slot = self.states.get(pair).map(|s| Arc::clone(s.value()))?;
        let guard = slot.lock().await;
        guard.clone()
    }
}

impl std::fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("pairs", &self.states.len())
            .field("publish_unchanged", &self.publish_unchanged)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::BroadcastPublisher;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use pricehub_core::{ManualClock, PriceUpdatePayload, PricesBatchPayload};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingPublisher {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl UpdatePublisher for FailingPublisher {
        async fn publish_price(&self, _: &PriceUpdatePayload) -> Result<(), PublishError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(PublishError::Failed("socket closed".into()))
        }

        async fn publish_batch(&self, _: &PricesBatchPayload) -> Result<(), PublishError> {
            Err(PublishError::Failed("socket closed".into()))
        }
    }

    fn sources(price: f64) -> BTreeMap<ExchangeId, f64> {
        BTreeMap::from([(ExchangeId::Binance, price), (ExchangeId::Mexc, price)])
    }

    fn tracker(store: Arc<MemoryStore>, publisher: Arc<BroadcastPublisher>) -> ChangeTracker {
        ChangeTracker::new(store, publisher, Arc::new(ManualClock::default()))
    }

    #[tokio::test]
    async fn test_two_applies_shift_previous_price() {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(BroadcastPublisher::default());
        let _rx = publisher.subscribe();
        let tracker = tracker(store.clone(), publisher.clone());

        let first = tracker.apply("BTCUSDT", 100.0, sources(100.0)).await;
        assert_eq!(first.state.previous_price, None);
        assert_eq!(first.state.is_price_increasing(), None);
        assert!(first.published);

        let second = tracker.apply("BTCUSDT", 110.0, sources(110.0)).await;
        assert_eq!(second.state.price, Some(110.0));
        assert_eq!(second.state.previous_price, Some(100.0));
        assert_eq!(second.state.price_change, Some(10.0));
        assert_eq!(second.state.price_change_percentage, Some(10.0));
        assert_eq!(second.state.is_price_increasing(), Some(true));
        assert_eq!(second.state.exchanges, vec![ExchangeId::Binance, ExchangeId::Mexc]);

        let stored = store.load_current_state("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(stored.previous_price, Some(100.0));
        assert_eq!(publisher.latest("BTCUSDT").unwrap().previous_price, 100.0);
    }

    #[tokio::test]
    async fn test_state_is_loaded_from_store_once() {
        let store = Arc::new(MemoryStore::new());
        let mut persisted = CurrentPriceState::new("ETHBTC", chrono::Utc::now());
        persisted.update_price_change(0.05);
        store.save_current_state("ETHBTC", &persisted).await.unwrap();

        let tracker = tracker(store, Arc::new(BroadcastPublisher::default()));
        let outcome = tracker.apply("ETHBTC", 0.04, sources(0.04)).await;

        assert_eq!(outcome.state.previous_price, Some(0.05));
        assert_eq!(outcome.state.is_price_increasing(), Some(false));
        assert!(outcome.state.id > 0);
    }

    #[tokio::test]
    async fn test_persist_failure_does_not_block_publish() {
        let store = Arc::new(MemoryStore::new());
        store.set_fail_writes(true);
        let publisher = Arc::new(BroadcastPublisher::default());
        let mut rx = publisher.subscribe();
        let tracker = tracker(store, publisher);

        let outcome = tracker.apply("BTCUSDT", 100.0, sources(100.0)).await;
        assert!(outcome.persist_error.is_some());
        assert!(outcome.published);
        assert_eq!(rx.recv().await.unwrap().data["price"], 100.0);
        assert_eq!(tracker.current("BTCUSDT").await.unwrap().price, Some(100.0));
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_state() {
        let publisher = Arc::new(FailingPublisher {
            attempts: AtomicUsize::new(0),
        });
        let tracker = ChangeTracker::new(
            Arc::new(MemoryStore::new()),
            publisher.clone(),
            Arc::new(ManualClock::default()),
        );

        let outcome = tracker.apply("BTCUSDT", 100.0, sources(100.0)).await;
        assert!(!outcome.published);
        assert!(outcome.publish_error.is_some());
        assert!(outcome.persist_error.is_none());
        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.current("BTCUSDT").await.unwrap().price, Some(100.0));
    }

    #[tokio::test]
    async fn test_unchanged_price_not_published_when_disabled() {
        let publisher = Arc::new(BroadcastPublisher::default());
        let _rx = publisher.subscribe();
        let tracker = tracker(Arc::new(MemoryStore::new()), publisher).publish_unchanged(false);

        assert!(tracker.apply("BTCUSDT", 100.0, sources(100.0)).await.published);
        assert!(!tracker.apply("BTCUSDT", 100.0, sources(100.0)).await.published);
        assert!(tracker.apply("BTCUSDT", 101.0, sources(101.0)).await.published);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_applies_do_not_interleave() {
        let store = Arc::new(MemoryStore::new());
        let tracker = Arc::new(tracker(store, Arc::new(BroadcastPublisher::default())));

        let handles: Vec<_> = (1..=50)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move { tracker.apply("BTCUSDT", i as f64, sources(i as f64)).await })
            })
            .collect();

        let mut outcomes = Vec::new();
        for h in handles {
            outcomes.push(h.await.unwrap().state);
        }

        // Every apply saw the price left by exactly one other apply
        let mut previous: Vec<f64> = outcomes.iter().filter_map(|s| s.previous_price).collect();
        previous.sort_by(|a, b| a.partial_cmp(b).unwrap());
        previous.dedup();
        assert_eq!(previous.len(), 49);

        for state in &outcomes {
            if let (Some(price), Some(prev), Some(change)) = (state.price, state.previous_price, state.price_change) {
                assert_eq!(change, price - prev);
            }
        }
    }
}
