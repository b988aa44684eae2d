//! Concurrent per-cycle fetching
//!
//! Every pair is fetched from every healthy exchange that supports it. Fetches
//! for one pair are joined before the pair completes; pairs complete in any
//! order. A global deadline bounds the whole cycle: pairs finished by then
//! are kept, the rest are abandoned.

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use pricehub_core::{
    ExchangeError, ExchangeErrorKind, ExchangeId, ExchangePrices, PairPrices, PricePoint, TradingPair,
};
use pricehub_price_feed::{Exchange, ExchangeClient, ExchangeRegistry};

/// One exchange failing one pair
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub pair: String,
    pub exchange: ExchangeId,
    pub error: ExchangeError,
}

/// Settled fetches for a single pair
#[derive(Debug, Clone, Default)]
pub struct PairFetch {
    pub pair: String,
    pub prices: ExchangePrices,
    pub failures: Vec<FetchFailure>,
    /// Exchanges that answered with a reading failing validation
    pub invalid: Vec<ExchangeId>,
}

/// Everything one fetch pass produced
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Only pairs with at least one successful source
    pub prices: PairPrices,
    pub failures: Vec<FetchFailure>,
    /// Pairs with no successful source this cycle
    pub skipped: Vec<String>,
    /// Pairs still in flight when the deadline hit
    pub abandoned: Vec<String>,
    pub timed_out: bool,
}

#[derive(Debug)]
pub struct FetchScheduler<C = Exchange> {
    registry: Arc<ExchangeRegistry<C>>,
    limiter: Arc<Semaphore>,
    global_timeout: Duration,
}

impl<C: ExchangeClient> FetchScheduler<C> {
    pub fn new(registry: Arc<ExchangeRegistry<C>>, max_concurrency: usize, global_timeout: Duration) -> Self {
        Self {
            registry,
            limiter: Arc::new(Semaphore::new(max_concurrency.max(1))),
            global_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ExchangeRegistry<C>> {
        &self.registry
    }

    pub fn global_timeout(&self) -> Duration {
        self.global_timeout
    }

    /// Fetch one pair from the given clients and wait for all of them
    pub async fn fetch_pair(&self, pair: &str, clients: &[Arc<C>]) -> PairFetch {
        let fetches = clients
            .iter()
            .filter(|client| client.is_symbol_supported(pair))
            .map(|client| self.fetch_one(pair, client));

        let mut result = PairFetch {
            pair: pair.to_string(),
            ..Default::default()
        };

        for (exchange, fetched) in join_all(fetches).await {
            match fetched {
                Ok(point) if point.is_valid => {
                    result.prices.insert(exchange, point);
                }
                Ok(point) => {
                    debug!(%exchange, symbol = pair, price = point.price, "discarding invalid reading");
                    result.invalid.push(exchange);
                }
                Err(err) => {
                    warn!(%exchange, symbol = pair, error = %err, "failed to fetch price");
                    result.failures.push(FetchFailure {
                        pair: pair.to_string(),
                        exchange,
                        error: err,
                    });
                }
            }
        }

        result
    }

    async fn fetch_one(
        &self,
        pair: &str,
        client: &Arc<C>,
    ) -> (ExchangeId, Result<PricePoint, ExchangeError>) {
        let exchange = client.id();

        let fetched = match self.limiter.acquire().await {
            Ok(_permit) => client.get_price(pair).await,
            Err(_) => Err(ExchangeError::new(
                exchange,
                ExchangeErrorKind::Transport("scheduler closed".into()),
            )),
        };

        self.registry.record_attempt(exchange, fetched.is_ok());
        (exchange, fetched)
    }

    /// Fetch every active pair from every healthy exchange under the global
    /// deadline
    pub async fn fetch_all(&self, pairs: &[TradingPair]) -> FetchOutcome {
        self.fetch_all_until(pairs, Instant::now() + self.global_timeout).await
    }

    /// Same as [`fetch_all`](Self::fetch_all) with the deadline chosen by the
    /// caller, so earlier work in a cycle counts against the same budget
    pub async fn fetch_all_until(&self, pairs: &[TradingPair], deadline: Instant) -> FetchOutcome {
        let clients = self.registry.healthy_clients();
        let mut outcome = FetchOutcome::default();

        let active: Vec<&str> = pairs
            .iter()
            .filter(|p| p.is_active)
            .map(|p| p.symbol.as_str())
            .collect();

        let mut pending: FuturesUnordered<_> = active
            .iter()
            .map(|pair| self.fetch_pair(pair, &clients))
            .collect();
        let mut completed: Vec<String> = Vec::with_capacity(active.len());

        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some(fetch) => {
                        completed.push(fetch.pair.clone());
                        self.settle(fetch, &mut outcome);
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    outcome.timed_out = true;
                    warn!(
                        completed = completed.len(),
                        total = active.len(),
                        timeout = ?self.global_timeout,
                        "global fetch timeout exceeded, abandoning remaining pairs"
                    );
                    break;
                }
            }
        }

        // Dropping the stream cancels whatever is still in flight
        drop(pending);

        outcome.abandoned = active
            .iter()
            .filter(|pair| !completed.iter().any(|c| c == *pair))
            .map(|pair| pair.to_string())
            .collect();

        outcome
    }

    fn settle(&self, fetch: PairFetch, outcome: &mut FetchOutcome) {
        if fetch.prices.is_empty() {
            let failed: Vec<String> = fetch.failures.iter().map(|f| f.exchange.to_string()).collect();
            if !failed.is_empty() {
                error!(symbol = %fetch.pair, failed_exchanges = ?failed, "all exchanges failed for pair, skipping");
            } else if !fetch.invalid.is_empty() {
                warn!(symbol = %fetch.pair, exchanges = ?fetch.invalid, "all readings invalid for pair, skipping");
            } else {
                warn!(symbol = %fetch.pair, "no healthy exchange supports pair, skipping");
            }
            outcome.skipped.push(fetch.pair);
        } else {
            outcome.prices.insert(fetch.pair, fetch.prices);
        }
        outcome.failures.extend(fetch.failures);
    }
}
