//! Trading pair definitions and symbol normalization
//!
//! Symbols are always stored in canonical form: uppercase, no separators.
//! "btc-usdt", "BTC/USDT" and "BTC_USDT" all map to "BTCUSDT".

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::CoreError;

/// Quote assets recognized when splitting an unseparated symbol.
/// Longer codes first so "BTCUSDT" does not split as "BTCUSD" + "T".
pub const KNOWN_QUOTES: [&str; 7] = ["USDT", "USDC", "BUSD", "EUR", "USD", "BTC", "ETH"];

/// Pairs tracked when nothing else is configured
pub const DEFAULT_PAIRS: [&str; 3] = ["BTCUSDC", "BTCUSDT", "ETHBTC"];

/// Canonical form of a symbol: uppercase with `/`, `-` and `_` removed
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '-' | '_'))
        .flat_map(char::to_uppercase)
        .collect()
}

/// A tradable symbol. Immutable reference data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TradingPair {
    pub symbol: String,
    pub base_currency: String,
    pub quote_currency: String,
    pub is_active: bool,
}

impl TradingPair {
    pub fn new(base: &str, quote: &str) -> Self {
        let base_currency = normalize_symbol(base);
        let quote_currency = normalize_symbol(quote);
        Self {
            symbol: format!("{base_currency}{quote_currency}"),
            base_currency,
            quote_currency,
            is_active: true,
        }
    }

    /// Parse "BTC/USDT", "btc-usdt" or "BTCUSDT".
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidPair(raw.to_string()));
        }

        let parts: Vec<&str> = trimmed
            .split(|c| matches!(c, '/' | '-' | '_'))
            .filter(|p| !p.is_empty())
            .collect();

        if parts.len() == 2 {
            return Ok(Self::new(parts[0], parts[1]));
        }

        let symbol = normalize_symbol(trimmed);
        if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidPair(raw.to_string()));
        }

        KNOWN_QUOTES
            .iter()
            .find(|quote| symbol.len() > quote.len() && symbol.ends_with(*quote))
            .map(|quote| Self::new(&symbol[..symbol.len() - quote.len()], quote))
            .ok_or_else(|| CoreError::InvalidPair(raw.to_string()))
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn defaults() -> Vec<TradingPair> {
        DEFAULT_PAIRS
            .iter()
            .filter_map(|s| TradingPair::parse(s).ok())
            .collect()
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}
