//! Huobi (HTX) spot REST client
//!
//! Symbols go on the wire in lowercase. The merged ticker only reports
//! open/close, so change figures are derived from those.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use pricehub_core::{
    normalize_symbol, ExchangeError, ExchangeErrorKind, ExchangeId, ExchangeResult, PricePoint,
};

use super::{number_field, optional_i64, ClientConfig, ClientCore, ExchangeClient};
use crate::http::RequestExecutor;

const TICKER_ENDPOINT: &str = "/market/detail/merged";
const TIMESTAMP_ENDPOINT: &str = "/v1/common/timestamp";

#[derive(Debug)]
pub struct HuobiClient {
    core: ClientCore,
}

impl HuobiClient {
    pub fn new(config: ClientConfig, executor: Arc<RequestExecutor>) -> Self {
        Self {
            core: ClientCore::new(ExchangeId::Huobi, config, executor),
        }
    }

    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<PricePoint> {
        let body = self
            .core
            .get(
                TICKER_ENDPOINT,
                vec![("symbol", symbol.to_lowercase())],
                Some(symbol),
                validate,
            )
            .await?;

        parse_merged(symbol, &body, self.core.now()).map_err(|kind| {
            ExchangeError::new(ExchangeId::Huobi, kind)
                .with_symbol(symbol)
                .with_raw(body.to_string())
        })
    }
}

/// Huobi wraps every payload in `{status, ...}`; `err-msg` explains failures
fn validate(body: &Value) -> Result<(), ExchangeErrorKind> {
    match body.get("status").and_then(Value::as_str) {
        Some(status) if status != "ok" => Err(ExchangeErrorKind::Api(
            body.get("err-msg")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string(),
        )),
        _ => Ok(()),
    }
}

fn timestamp_ok(body: &Value) -> bool {
    body.get("status").and_then(Value::as_str) == Some("ok")
        && body.get("data").map_or(false, |d| !d.is_null())
}

fn parse_merged(
    symbol: &str,
    body: &Value,
    fetched_at: DateTime<Utc>,
) -> Result<PricePoint, ExchangeErrorKind> {
    let tick = body
        .get("tick")
        .ok_or_else(|| ExchangeErrorKind::Malformed("missing tick".into()))?;

    let close = number_field(tick, "close")?;
    let open = number_field(tick, "open")?;

    Ok(PricePoint::builder(symbol, ExchangeId::Huobi)
        .price(close)
        .range(number_field(tick, "high")?, number_field(tick, "low")?)
        .volume(number_field(tick, "vol")?)
        .change_from_open(open, close)
        .exchange_timestamp_ms(optional_i64(body, "ts"))
        .fetched_at(fetched_at)
        .raw(body.clone())
        .build())
}

#[async_trait]
impl ExchangeClient for HuobiClient {
    fn id(&self) -> ExchangeId {
        self.core.id()
    }

    fn supported_pairs(&self) -> &BTreeSet<String> {
        self.core.supported_pairs()
    }

    async fn get_price(&self, symbol: &str) -> ExchangeResult<PricePoint> {
        let symbol = normalize_symbol(symbol);
        if !self.is_symbol_supported(&symbol) {
            return Err(ExchangeError::unsupported(self.id(), &symbol));
        }
        self.fetch_ticker(&symbol).await
    }

    /// No batch endpoint: one request per symbol, failures skipped
    async fn get_prices(&self, symbols: &[String]) -> ExchangeResult<BTreeMap<String, PricePoint>> {
        let mut prices = BTreeMap::new();

        for symbol in symbols.iter().map(|s| normalize_symbol(s)) {
            match self.fetch_ticker(&symbol).await {
                Ok(point) => {
                    prices.insert(symbol, point);
                }
                Err(err) => {
                    tracing::warn!(exchange = %self.id(), symbol = %symbol, error = %err, "failed to fetch price");
                }
            }
        }

        Ok(prices)
    }

    async fn is_healthy(&self) -> bool {
        match self.core.ping(TIMESTAMP_ENDPOINT, validate).await {
            Ok(body) => timestamp_ok(&body),
            Err(err) => {
                tracing::debug!(exchange = %self.id(), error = %err, "health check failed");
                false
            }
        }
    }
}
