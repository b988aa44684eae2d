//! Wire payloads handed to the publish collaborator

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ExchangeId, PairPrices};

/// Channel all price events go out on
pub const PRICES_CHANNEL: &str = "prices";
/// Event name of a single pair update
pub const PRICE_UPDATED_EVENT: &str = "crypto.price.updated";
/// Event name of the per-cycle batch of raw tickers
pub const PRICES_BATCH_EVENT: &str = "prices.updated";

/// Published after a pair's tracked price changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdatePayload {
    pub id: u64,
    pub pair: String,
    pub price: f64,
    pub previous_price: f64,
    pub price_change: f64,
    pub price_change_percentage: f64,
    pub exchanges: Vec<String>,
    pub is_increasing: Option<bool>,
    /// ISO-8601
    pub updated_at: String,
}

/// Sanitized ticker inside a batch payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTicker {
    pub symbol: String,
    pub price: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMeta {
    pub exchange_count: usize,
    pub total_pairs: usize,
    pub server_time: String,
    /// Number of tickers each exchange contributed
    pub exchanges: BTreeMap<ExchangeId, usize>,
    pub price_range: PriceRange,
}

/// Raw per-exchange map for a whole cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricesBatchPayload {
    pub prices: BTreeMap<String, BTreeMap<ExchangeId, BatchTicker>>,
    pub timestamp: String,
    pub meta: BatchMeta,
}

impl PricesBatchPayload {
    /// Build a batch from a cycle's readings. Entries without a finite
    /// price are dropped, as are pairs left with no entries.
    pub fn from_prices(prices: &PairPrices, at: DateTime<Utc>) -> Self {
        let timestamp = at.to_rfc3339_opts(SecondsFormat::Secs, false);

        let sanitized: BTreeMap<String, BTreeMap<ExchangeId, BatchTicker>> = prices
            .iter()
            .map(|(symbol, by_exchange)| {
                let tickers = by_exchange
                    .iter()
                    .filter(|(_, p)| p.price.is_finite())
                    .map(|(exchange, p)| {
                        (
                            *exchange,
                            BatchTicker {
                                symbol: p.symbol.clone(),
                                price: p.price,
                                high: p.high,
                                low: p.low,
                                volume: p.volume,
                                price_change: p.price_change,
                                price_change_percent: p.price_change_percent,
                            },
                        )
                    })
                    .collect::<BTreeMap<_, _>>();
                (symbol.clone(), tickers)
            })
            .filter(|(_, tickers)| !tickers.is_empty())
            .collect();

        let mut exchanges: BTreeMap<ExchangeId, usize> = BTreeMap::new();
        let mut min: Option<f64> = None;
        let mut max: Option<f64> = None;

        for tickers in sanitized.values() {
            for (exchange, ticker) in tickers {
                *exchanges.entry(*exchange).or_default() += 1;
                min = Some(min.map_or(ticker.price, |m| m.min(ticker.price)));
                max = Some(max.map_or(ticker.price, |m| m.max(ticker.price)));
            }
        }

        let meta = BatchMeta {
            exchange_count: sanitized.len(),
            total_pairs: sanitized.len(),
            server_time: timestamp.clone(),
            exchanges,
            price_range: PriceRange { min, max },
        };

        Self {
            prices: sanitized,
            timestamp,
            meta,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}
