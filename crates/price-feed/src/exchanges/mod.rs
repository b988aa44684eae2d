//! Exchange REST clients
//!
//! Every exchange implements [`ExchangeClient`]. The set of exchanges is
//! closed: [`Exchange`] is the enum the daemon builds from configuration,
//! dispatching to the concrete client by match.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Semaphore;

use pricehub_core::{
    normalize_symbol, ExchangeEndpoint, ExchangeError, ExchangeErrorKind, ExchangeId,
    ExchangeResult, PricePoint, TradingPair,
};

use crate::http::{ExchangeRequest, RequestExecutor, ResponseValidator};

pub mod binance;
pub mod huobi;
pub mod mexc;

pub use binance::BinanceClient;
pub use huobi::HuobiClient;
pub use mexc::MexcClient;

/// Capability set every exchange provides
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn id(&self) -> ExchangeId;

    /// Canonical symbols this client will be asked for
    fn supported_pairs(&self) -> &BTreeSet<String>;

    fn is_symbol_supported(&self, symbol: &str) -> bool {
        self.supported_pairs().contains(&normalize_symbol(symbol))
    }

    async fn get_price(&self, symbol: &str) -> ExchangeResult<PricePoint>;

    /// Partial results allowed: unresolvable symbols are simply absent.
    /// Keys are canonical symbols.
    async fn get_prices(&self, symbols: &[String]) -> ExchangeResult<BTreeMap<String, PricePoint>>;

    /// Lightweight liveness check. Never fails, returns `false` instead.
    async fn is_healthy(&self) -> bool;
}

/// Connection settings for one client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub supported_pairs: BTreeSet<String>,
    /// Max in-flight requests, derived from the exchange rate limit
    pub max_in_flight: usize,
}

impl ClientConfig {
    pub fn for_exchange(id: ExchangeId, endpoint: &ExchangeEndpoint, pairs: &[TradingPair]) -> Self {
        let supported_pairs = match &endpoint.pairs {
            Some(only) => only.iter().map(|s| normalize_symbol(s)).collect(),
            None => pairs
                .iter()
                .filter(|p| p.is_active)
                .map(|p| p.symbol.clone())
                .collect(),
        };

        Self {
            base_url: endpoint
                .base_url
                .clone()
                .unwrap_or_else(|| id.default_base_url().to_string()),
            api_key: endpoint.api_key.clone(),
            supported_pairs,
            max_in_flight: id.rate_limit() as usize,
        }
    }
}

/// State every concrete client shares: identity, endpoint, limiter
#[derive(Debug)]
pub struct ClientCore {
    id: ExchangeId,
    config: ClientConfig,
    executor: Arc<RequestExecutor>,
    limiter: Semaphore,
}

impl ClientCore {
    pub fn new(id: ExchangeId, config: ClientConfig, executor: Arc<RequestExecutor>) -> Self {
        let limiter = Semaphore::new(config.max_in_flight.max(1));
        Self {
            id,
            config,
            executor,
            limiter,
        }
    }

    pub fn id(&self) -> ExchangeId {
        self.id
    }

    pub fn supported_pairs(&self) -> &BTreeSet<String> {
        &self.config.supported_pairs
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.executor.now()
    }

    pub async fn get(
        &self,
        endpoint: &str,
        params: Vec<(&'static str, String)>,
        symbol: Option<&str>,
        validate: ResponseValidator,
    ) -> ExchangeResult<Value> {
        let _permit = self.acquire().await?;

        let mut request = self.request(endpoint);
        request.params = params;
        if let Some(symbol) = symbol {
            request = request.symbol(symbol);
        }

        self.executor.get_json(&request, validate).await
    }

    /// Single short attempt at a liveness endpoint, no retry or cache
    pub async fn ping(&self, endpoint: &str, validate: ResponseValidator) -> ExchangeResult<Value> {
        let _permit = self.acquire().await?;
        self.executor.ping_json(&self.request(endpoint), validate).await
    }

    async fn acquire(&self) -> ExchangeResult<tokio::sync::SemaphorePermit<'_>> {
        self.limiter.acquire().await.map_err(|_| {
            ExchangeError::new(self.id, ExchangeErrorKind::Transport("client closed".into()))
        })
    }

    fn request<'a>(&'a self, endpoint: &'a str) -> ExchangeRequest<'a> {
        ExchangeRequest::new(self.id, &self.config.base_url, endpoint)
            .api_key(self.config.api_key.as_deref())
    }
}

/// Closed set of configured exchanges
#[derive(Debug)]
pub enum Exchange {
    Binance(BinanceClient),
    Mexc(MexcClient),
    Huobi(HuobiClient),
}

impl Exchange {
    pub fn build(id: ExchangeId, config: ClientConfig, executor: Arc<RequestExecutor>) -> Self {
        match id {
            ExchangeId::Binance => Exchange::Binance(BinanceClient::new(config, executor)),
            ExchangeId::Mexc => Exchange::Mexc(MexcClient::new(config, executor)),
            ExchangeId::Huobi => Exchange::Huobi(HuobiClient::new(config, executor)),
        }
    }
}

#[async_trait]
impl ExchangeClient for Exchange {
    fn id(&self) -> ExchangeId {
        match self {
            Exchange::Binance(c) => c.id(),
            Exchange::Mexc(c) => c.id(),
            Exchange::Huobi(c) => c.id(),
        }
    }

    fn supported_pairs(&self) -> &BTreeSet<String> {
        match self {
            Exchange::Binance(c) => c.supported_pairs(),
            Exchange::Mexc(c) => c.supported_pairs(),
            Exchange::Huobi(c) => c.supported_pairs(),
        }
    }

    async fn get_price(&self, symbol: &str) -> ExchangeResult<PricePoint> {
        match self {
            Exchange::Binance(c) => c.get_price(symbol).await,
            Exchange::Mexc(c) => c.get_price(symbol).await,
            Exchange::Huobi(c) => c.get_price(symbol).await,
        }
    }

    async fn get_prices(&self, symbols: &[String]) -> ExchangeResult<BTreeMap<String, PricePoint>> {
        match self {
            Exchange::Binance(c) => c.get_prices(symbols).await,
            Exchange::Mexc(c) => c.get_prices(symbols).await,
            Exchange::Huobi(c) => c.get_prices(symbols).await,
        }
    }

    async fn is_healthy(&self) -> bool {
        match self {
            Exchange::Binance(c) => c.is_healthy().await,
            Exchange::Mexc(c) => c.is_healthy().await,
            Exchange::Huobi(c) => c.is_healthy().await,
        }
    }
}

/// Read a numeric field that may arrive as a JSON number or a numeric string
pub(crate) fn number_field(value: &Value, field: &str) -> Result<f64, ExchangeErrorKind> {
    let raw = value
        .get(field)
        .ok_or_else(|| ExchangeErrorKind::Malformed(format!("missing field {field}")))?;

    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| ExchangeErrorKind::Malformed(format!("field {field} is not numeric: {raw}")))
}

pub(crate) fn optional_i64(value: &Value, field: &str) -> Option<i64> {
    match value.get(field)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Map a Binance-style `/ticker/24hr` entry (shared by Binance and MEXC)
pub(crate) fn parse_24hr_ticker(
    exchange: ExchangeId,
    symbol: &str,
    ticker: &Value,
    fetched_at: DateTime<Utc>,
) -> Result<PricePoint, ExchangeErrorKind> {
    Ok(PricePoint::builder(symbol, exchange)
        .price(number_field(ticker, "lastPrice")?)
        .range(number_field(ticker, "highPrice")?, number_field(ticker, "lowPrice")?)
        .volume(number_field(ticker, "volume")?)
        .change(
            number_field(ticker, "priceChange")?,
            number_field(ticker, "priceChangePercent")?,
        )
        .exchange_timestamp_ms(optional_i64(ticker, "closeTime"))
        .fetched_at(fetched_at)
        .raw(ticker.clone())
        .build())
}

/// Pick requested symbols out of a full `/ticker/24hr` listing.
/// Symbols absent from the listing, or whose entry does not parse, are skipped.
pub(crate) fn pick_24hr_tickers(
    exchange: ExchangeId,
    listing: &Value,
    symbols: &[String],
    fetched_at: DateTime<Utc>,
) -> Result<BTreeMap<String, PricePoint>, ExchangeErrorKind> {
    let entries = listing
        .as_array()
        .ok_or_else(|| ExchangeErrorKind::Malformed("ticker listing is not an array".into()))?;

    let wanted: BTreeSet<String> = symbols.iter().map(|s| normalize_symbol(s)).collect();
    let mut prices = BTreeMap::new();

    for entry in entries {
        let Some(symbol) = entry.get("symbol").and_then(Value::as_str) else {
            continue;
        };
        if !wanted.contains(symbol) {
            continue;
        }
        match parse_24hr_ticker(exchange, symbol, entry, fetched_at) {
            Ok(point) => {
                prices.insert(symbol.to_string(), point);
            }
            Err(kind) => {
                tracing::warn!(%exchange, symbol, error = %kind, "skipping unparsable ticker");
            }
        }
    }

    Ok(prices)
}
