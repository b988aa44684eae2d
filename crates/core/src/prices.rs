//! Per-exchange price readings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ExchangeId;

/// One exchange's reading for one pair at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub symbol: String,
    pub exchange: ExchangeId,
    pub price: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
    /// Exchange-reported timestamp in milliseconds, when provided
    pub exchange_timestamp_ms: Option<i64>,
    pub fetched_at: DateTime<Utc>,
    /// Raw ticker payload as received
    pub raw_data: serde_json::Value,
    pub is_valid: bool,
}

impl PricePoint {
    /// Validity invariant: finite positive price and non-negative volume
    pub fn check_valid(price: f64, volume: f64) -> bool {
        price.is_finite() && price > 0.0 && volume.is_finite() && volume >= 0.0
    }

    pub fn builder(symbol: &str, exchange: ExchangeId) -> PricePointBuilder {
        PricePointBuilder::new(symbol, exchange)
    }

    pub fn revalidate(&mut self) {
        self.is_valid = Self::check_valid(self.price, self.volume);
    }
}

/// Builder that fills missing high/low with the price and derives validity
#[derive(Debug, Clone)]
pub struct PricePointBuilder {
    symbol: String,
    exchange: ExchangeId,
    price: f64,
    high: Option<f64>,
    low: Option<f64>,
    volume: f64,
    price_change: f64,
    price_change_percent: f64,
    exchange_timestamp_ms: Option<i64>,
    fetched_at: Option<DateTime<Utc>>,
    raw_data: serde_json::Value,
}

impl PricePointBuilder {
    pub fn new(symbol: &str, exchange: ExchangeId) -> Self {
        Self {
            symbol: symbol.to_string(),
            exchange,
            price: 0.0,
            high: None,
            low: None,
            volume: 0.0,
            price_change: 0.0,
            price_change_percent: 0.0,
            exchange_timestamp_ms: None,
            fetched_at: None,
            raw_data: serde_json::Value::Null,
        }
    }

    pub fn price(mut self, price: f64) -> Self {
        self.price = price;
        self
    }

    pub fn range(mut self, high: f64, low: f64) -> Self {
        self.high = Some(high);
        self.low = Some(low);
        self
    }

    pub fn volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    pub fn change(mut self, change: f64, change_percent: f64) -> Self {
        self.price_change = change;
        self.price_change_percent = change_percent;
        self
    }

    /// Derive change figures from an open/close pair for exchanges that
    /// only report those.
    pub fn change_from_open(mut self, open: f64, close: f64) -> Self {
        let change = close - open;
        self.price_change = change;
        self.price_change_percent = if open > 0.0 { change / open * 100.0 } else { 0.0 };
        self
    }

    pub fn exchange_timestamp_ms(mut self, ts: Option<i64>) -> Self {
        self.exchange_timestamp_ms = ts;
        self
    }

    pub fn fetched_at(mut self, at: DateTime<Utc>) -> Self {
        self.fetched_at = Some(at);
        self
    }

    pub fn raw(mut self, raw: serde_json::Value) -> Self {
        self.raw_data = raw;
        self
    }

    pub fn build(self) -> PricePoint {
        PricePoint {
            is_valid: PricePoint::check_valid(self.price, self.volume),
            high: self.high.unwrap_or(self.price),
            low: self.low.unwrap_or(self.price),
            symbol: self.symbol,
            exchange: self.exchange,
            price: self.price,
            volume: self.volume,
            price_change: self.price_change,
            price_change_percent: self.price_change_percent,
            exchange_timestamp_ms: self.exchange_timestamp_ms,
            fetched_at: self.fetched_at.unwrap_or_else(Utc::now),
            raw_data: self.raw_data,
        }
    }
}

/// Readings for one pair keyed by exchange, ordered by exchange id
pub type ExchangePrices = BTreeMap<ExchangeId, PricePoint>;

/// Readings for a whole cycle keyed by pair symbol
pub type PairPrices = BTreeMap<String, ExchangePrices>;
