//! MEXC spot REST client
//!
//! Shares the Binance ticker schema; error codes may arrive as strings.

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
pub struct MexcClient {
    core: ClientCore,
}

impl MexcClient {
    pub fn new(config: ClientConfig, executor: Arc<RequestExecutor>) -> Self {
        Self {
            core: ClientCore::new(ExchangeId::Mexc, config, executor),
        }
    }
}

fn validate(body: &Value) -> Result<(), ExchangeErrorKind> {
    let Some(code) = body.get("code") else {
        return Ok(());
    };

    let ok = match code {
        Value::Number(n) => n.as_i64() == Some(200),
        Value::String(s) => s == "200",
        _ => false,
    };
    if ok {
        return Ok(());
    }

    Err(ExchangeErrorKind::Api(
        body.get("msg")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string(),
    ))
}

#[async_trait]
impl ExchangeClient for MexcClient {
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
            Ok(_) => true,
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
    fn test_validate_accepts_string_and_numeric_200() {
        assert!(validate(&json!({"code": "200"})).is_ok());
        assert!(validate(&json!({"code": 200})).is_ok());
        assert!(validate(&json!({"symbol": "ETHBTC"})).is_ok());

        let err = validate(&json!({"code": 30014, "msg": "Invalid symbol."})).unwrap_err();
        assert_eq!(err, ExchangeErrorKind::Api("Invalid symbol.".into()));
        assert!(validate(&json!({"code": "-1"})).is_err());
    }

    #[test]
    fn test_parse_ticker_fixture() {
        let fixture = json!({
            "symbol": "ETHBTC",
            "priceChange": "0.00012",
            "priceChangePercent": "0.0045",
            "prevClosePrice": "0.02653",
            "lastPrice": "0.02665",
            "highPrice": "0.02701",
            "lowPrice": "0.02610",
            "volume": "812.44",
            "openTime": 1740065700000_i64,
            "closeTime": 1740152100000_i64
        });

        let point = parse_24hr_ticker(ExchangeId::Mexc, "ETHBTC", &fixture, chrono::Utc::now()).unwrap();
        assert_eq!(point.exchange, ExchangeId::Mexc);
        assert_eq!(point.price, 0.02665);
        assert_eq!(point.volume, 812.44);
        assert!(point.is_valid);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let fixture = json!({"symbol": "ETHBTC", "lastPrice": "0.02"});
        let err = parse_24hr_ticker(ExchangeId::Mexc, "ETHBTC", &fixture, chrono::Utc::now()).unwrap_err();
        assert!(matches!(err, ExchangeErrorKind::Malformed(_)));
    }
}
