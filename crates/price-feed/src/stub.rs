//! Scripted in-memory exchange for tests
//!
//! Available to other crates through the `test-util` feature.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use pricehub_core::{
    normalize_symbol, ExchangeError, ExchangeErrorKind, ExchangeId, ExchangeResult, PricePoint,
};

use crate::exchanges::ExchangeClient;

#[derive(Debug)]
pub struct StubExchange {
    id: ExchangeId,
    pairs: BTreeSet<String>,
    responses: RwLock<BTreeMap<String, Result<PricePoint, ExchangeErrorKind>>>,
    healthy: AtomicBool,
    delay: RwLock<Option<Duration>>,
    health_delay: RwLock<Option<Duration>>,
    calls: AtomicUsize,
}

impl StubExchange {
    pub fn new(id: ExchangeId, pairs: &[&str]) -> Self {
        Self {
            id,
            pairs: pairs.iter().map(|p| normalize_symbol(p)).collect(),
            responses: RwLock::new(BTreeMap::new()),
            healthy: AtomicBool::new(true),
            delay: RwLock::new(None),
            health_delay: RwLock::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unhealthy(self) -> Self {
        self.set_healthy(false);
        self
    }

    pub fn with_price(self, symbol: &str, price: f64, volume: f64) -> Self {
        self.set_price(symbol, price, volume);
        self
    }

    pub fn with_failure(self, symbol: &str, kind: ExchangeErrorKind) -> Self {
        self.set_failure(symbol, kind);
        self
    }

    /// Every fetch sleeps this long first
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.write() = Some(delay);
        self
    }

    /// Every health check sleeps this long first
    pub fn set_health_delay(&self, delay: Duration) {
        *self.health_delay.write() = Some(delay);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_price(&self, symbol: &str, price: f64, volume: f64) {
        let symbol = normalize_symbol(symbol);
        let point = PricePoint::builder(&symbol, self.id)
            .price(price)
            .volume(volume)
            .build();
        self.responses.write().insert(symbol, Ok(point));
    }

    pub fn set_point(&self, point: PricePoint) {
        self.responses.write().insert(point.symbol.clone(), Ok(point));
    }

    pub fn set_failure(&self, symbol: &str, kind: ExchangeErrorKind) {
        self.responses.write().insert(normalize_symbol(symbol), Err(kind));
    }

    /// Number of `get_price`/`get_prices` calls served
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn lookup(&self, symbol: &str) -> ExchangeResult<PricePoint> {
        match self.responses.read().get(symbol) {
            Some(Ok(point)) => Ok(point.clone()),
            Some(Err(kind)) => Err(ExchangeError::new(self.id, kind.clone()).with_symbol(symbol)),
            None => Err(ExchangeError::unsupported(self.id, symbol)),
        }
    }
}

#[async_trait]
impl ExchangeClient for StubExchange {
    fn id(&self) -> ExchangeId {
        self.id
    }

    fn supported_pairs(&self) -> &BTreeSet<String> {
        &self.pairs
    }

    async fn get_price(&self, symbol: &str) -> ExchangeResult<PricePoint> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.lookup(&normalize_symbol(symbol))
    }

    async fn get_prices(&self, symbols: &[String]) -> ExchangeResult<BTreeMap<String, PricePoint>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .filter_map(|s| self.lookup(&s).ok().map(|p| (s, p)))
            .collect())
    }

    async fn is_healthy(&self) -> bool {
        let delay = *self.health_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.healthy.load(Ordering::SeqCst)
    }
}
