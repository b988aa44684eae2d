//! Publish collaborator
//!
//! Publishing is fire-and-forget for the pipeline: failures are reported back
//! so they can be logged, never used to roll back persisted state.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use pricehub_core::{
    PriceUpdatePayload, PricesBatchPayload, PublishError, PRICES_BATCH_EVENT, PRICES_CHANNEL,
    PRICE_UPDATED_EVENT,
};

#[async_trait]
pub trait UpdatePublisher: Send + Sync {
    /// One pair's tracked price after an aggregation
    async fn publish_price(&self, payload: &PriceUpdatePayload) -> Result<(), PublishError>;

    /// Raw per-exchange tickers of a whole cycle
    async fn publish_batch(&self, payload: &PricesBatchPayload) -> Result<(), PublishError>;
}

/// Event as it goes out to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub channel: &'static str,
    pub event: &'static str,
    pub data: Value,
}

/// In-process fan-out over a tokio broadcast channel.
///
/// Keeps the last payload per pair so late subscribers can read the current
/// state without waiting for the next cycle.
#[derive(Debug)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<PublishedEvent>,
    latest: DashMap<String, PriceUpdatePayload>,
    latest_batch: parking_lot::RwLock<Option<PricesBatchPayload>>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            latest: DashMap::new(),
            latest_batch: parking_lot::RwLock::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }

    /// Subscription as a `Stream`; lagged receivers yield an error item
    pub fn stream(&self) -> BroadcastStream<PublishedEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    pub fn latest(&self, pair: &str) -> Option<PriceUpdatePayload> {
        self.latest.get(pair).map(|p| p.value().clone())
    }

    /// Every cached pair payload, ordered by pair
    pub fn latest_all(&self) -> Vec<PriceUpdatePayload> {
        let mut all: Vec<PriceUpdatePayload> = self.latest.iter().map(|p| p.value().clone()).collect();
        all.sort_by(|a, b| a.pair.cmp(&b.pair));
        all
    }

    pub fn latest_batch(&self) -> Option<PricesBatchPayload> {
        self.latest_batch.read().clone()
    }

    fn send(&self, event: &'static str, data: Value) -> Result<(), PublishError> {
        let receivers = self
            .tx
            .send(PublishedEvent {
                channel: PRICES_CHANNEL,
                event,
                data,
            })
            .map_err(|_| PublishError::NoSubscribers(PRICES_CHANNEL.to_string()))?;

        debug!(event, receivers, "event published");
        Ok(())
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl UpdatePublisher for BroadcastPublisher {
    async fn publish_price(&self, payload: &PriceUpdatePayload) -> Result<(), PublishError> {
        let data = serde_json::to_value(payload).map_err(|e| PublishError::Serialization(e.to_string()))?;
        self.latest.insert(payload.pair.clone(), payload.clone());
        self.send(PRICE_UPDATED_EVENT, data)
    }

    async fn publish_batch(&self, payload: &PricesBatchPayload) -> Result<(), PublishError> {
        let data = serde_json::to_value(payload).map_err(|e| PublishError::Serialization(e.to_string()))?;
        *self.latest_batch.write() = Some(payload.clone());
        self.send(PRICES_BATCH_EVENT, data)
    }
}
