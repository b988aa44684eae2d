//! Binance spot REST client

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use pricehub_core::{
    normalize_symbol, ExchangeError, ExchangeErrorKind, ExchangeId, ExchangeResult, PricePoint,
};

use super::{parse_24hr_ticker, pick_24hr_tickers, ClientConfig, ClientCore, ExchangeClient};
use crate::http::RequestExecutor;

const TICKER_ENDPOINT: &str = "/ticker/24hr";
const PING_ENDPOINT: &str = "/ping";

#[derive(Debug)]
pub struct BinanceClient {
    core: ClientCore,
}

impl BinanceClient {
    pub fn new(config: ClientConfig, executor: Arc<RequestExecutor>) -> Self {
        Self {
            core: ClientCore::new(ExchangeId::Binance, config, executor),
        }
    }
}

/// Binance signals errors with a `code`/`msg` body
fn validate(body: &Value) -> Result<(), ExchangeErrorKind> {
    match body.get("code") {
        Some(code) if code.as_i64() != Some(200) => Err(ExchangeErrorKind::Api(
            body.get("msg")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string(),
        )),
        _ => Ok(()),
    }
}

/// `/ping` answers with an empty object when the API is up
fn ping_ok(body: &Value) -> bool {
    body.as_object().map_or(false, |o| o.is_empty())
}

#[async_trait]
impl ExchangeClient for BinanceClient {
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

        let body = self
            .core
            .get(
                TICKER_ENDPOINT,
                vec![("symbol", symbol.clone())],
                Some(&symbol),
                validate,
            )
            .await?;

        parse_24hr_ticker(self.id(), &symbol, &body, self.core.now()).map_err(|kind| {
            ExchangeError::new(self.id(), kind)
                .with_symbol(&symbol)
                .with_raw(body.to_string())
        })
    }

    async fn get_prices(&self, symbols: &[String]) -> ExchangeResult<BTreeMap<String, PricePoint>> {
        let body = self.core.get(TICKER_ENDPOINT, vec![], None, validate).await?;

        pick_24hr_tickers(self.id(), &body, symbols, self.core.now())
            .map_err(|kind| ExchangeError::new(self.id(), kind))
    }

    async fn is_healthy(&self) -> bool {
        match self.core.ping(PING_ENDPOINT, validate).await {
            Ok(body) => ping_ok(&body),
            Err(err) => {
                tracing::debug!(exchange = %self.id(), error = %err, "health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_error_body() {
        let err = validate(&json!({"code": -1121, "msg": "Invalid symbol."})).unwrap_err();
        assert_eq!(err, ExchangeErrorKind::Api("Invalid symbol.".into()));

        assert!(validate(&json!({"code": 200})).is_ok());
        assert!(validate(&json!({"symbol": "BTCUSDT"})).is_ok());
        assert!(validate(&json!([])).is_ok());
    }

    #[test]
    fn test_ping_body() {
        assert!(ping_ok(&json!({})));
        assert!(!ping_ok(&json!({"code": 0})));
        assert!(!ping_ok(&json!([])));
    }

    #[test]
    fn test_parse_ticker_fixture() {
        let fixture = json!({
            "symbol": "BTCUSDT",
            "priceChange": "-94.99999800",
            "priceChangePercent": "-0.095",
            "lastPrice": "99905.00000000",
            "highPrice": "100500.00000000",
            "lowPrice": "98800.00000000",
            "volume": "12345.67800000",
            "openTime": 1740065708000_i64,
            "closeTime": 1740152108000_i64
        });

        let point = parse_24hr_ticker(ExchangeId::Binance, "BTCUSDT", &fixture, chrono::Utc::now()).unwrap();
        assert_eq!(point.price, 99_905.0);
        assert_eq!(point.high, 100_500.0);
        assert_eq!(point.low, 98_800.0);
        assert_eq!(point.price_change_percent, -0.095);
        assert_eq!(point.exchange_timestamp_ms, Some(1740152108000));
        assert!(point.is_valid);
        assert_eq!(point.raw_data, fixture);
    }
}
