//! Current per-pair price state

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ExchangeId, PriceUpdatePayload};

/// Tracked price for one pair. Mutated only through [`CurrentPriceState::record`]
/// / [`CurrentPriceState::update_price_change`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentPriceState {
    /// Row id, 0 until the store has saved the state once
    pub id: u64,
    pub pair: String,
    pub price: Option<f64>,
    pub previous_price: Option<f64>,
    pub price_change: Option<f64>,
    pub price_change_percentage: Option<f64>,
    pub exchanges: Vec<ExchangeId>,
    /// Last price each contributing exchange reported
    pub exchange_prices: BTreeMap<ExchangeId, f64>,
    pub updated_at: DateTime<Utc>,
}

impl CurrentPriceState {
    pub fn new(pair: &str, at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            pair: pair.to_string(),
            price: None,
            previous_price: None,
            price_change: None,
            price_change_percentage: None,
            exchanges: vec![],
            exchange_prices: BTreeMap::new(),
            updated_at: at,
        }
    }

    /// Shift current -> previous and recompute deltas.
    ///
    /// A missing or zero prior price counts as no prior observation.
    pub fn update_price_change(&mut self, new_price: f64) {
        if let Some(current) = self.price.filter(|p| *p != 0.0) {
            let change = new_price - current;
            self.previous_price = Some(current);
            self.price_change = Some(change);
            self.price_change_percentage = Some(if current > 0.0 {
                change / current * 100.0
            } else {
                0.0
            });
        }

        self.price = Some(new_price);
    }

    /// Apply a new aggregate observation
    pub fn record(
        &mut self,
        new_price: f64,
        exchange_prices: BTreeMap<ExchangeId, f64>,
        at: DateTime<Utc>,
    ) {
        self.update_price_change(new_price);
        self.exchanges = exchange_prices.keys().copied().collect();
        self.exchange_prices = exchange_prices;
        self.updated_at = at;
    }

    /// `None` until a change has been computed at least once
    pub fn is_price_increasing(&self) -> Option<bool> {
        self.price_change.map(|c| c > 0.0)
    }

    pub fn payload(&self) -> PriceUpdatePayload {
        PriceUpdatePayload {
            id: self.id,
            pair: self.pair.clone(),
            price: self.price.unwrap_or(0.0),
            previous_price: self.previous_price.unwrap_or(0.0),
            price_change: self.price_change.unwrap_or(0.0),
            price_change_percentage: self.price_change_percentage.unwrap_or(0.0),
            exchanges: self.exchanges.iter().map(|e| e.name().to_string()).collect(),
            is_increasing: self.is_price_increasing(),
            updated_at: self.updated_at.to_rfc3339_opts(SecondsFormat::Secs, false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices(entries: &[(ExchangeId, f64)]) -> BTreeMap<ExchangeId, f64> {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_first_observation_has_no_change() {
        let mut state = CurrentPriceState::new("BTCUSDT", Utc::now());
        state.update_price_change(100.0);

        assert_eq!(state.price, Some(100.0));
        assert_eq!(state.previous_price, None);
        assert_eq!(state.price_change, None);
        assert_eq!(state.is_price_increasing(), None);
    }

    #[test]
    fn test_two_updates_shift_previous() {
        let mut state = CurrentPriceState::new("BTCUSDT", Utc::now());
        state.update_price_change(100.0);
        state.update_price_change(110.0);

        assert_eq!(state.previous_price, Some(100.0));
        assert_eq!(state.price, Some(110.0));
        assert_eq!(state.price_change, Some(10.0));
        assert!((state.price_change_percentage.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(state.is_price_increasing(), Some(true));

        state.update_price_change(110.0);
        assert_eq!(state.previous_price, Some(110.0));
        assert_eq!(state.price_change, Some(0.0));
        assert_eq!(state.is_price_increasing(), Some(false));
    }

    #[test]
    fn test_non_positive_previous_price_gives_zero_percentage() {
        let mut state = CurrentPriceState::new("ETHBTC", Utc::now());
        state.price = Some(-2.0);
        state.update_price_change(5.0);

        assert_eq!(state.previous_price, Some(-2.0));
        assert_eq!(state.price_change, Some(7.0));
        assert_eq!(state.price_change_percentage, Some(0.0));
    }

    #[test]
    fn test_record_sets_exchanges() {
        let at = Utc::now();
        let mut state = CurrentPriceState::new("BTCUSDT", at);
        state.record(
            50_000.0,
            prices(&[(ExchangeId::Mexc, 50_010.0), (ExchangeId::Binance, 49_990.0)]),
            at,
        );

        assert_eq!(state.exchanges, vec![ExchangeId::Binance, ExchangeId::Mexc]);
        assert_eq!(state.exchange_prices[&ExchangeId::Mexc], 50_010.0);
    }

    #[test]
    fn test_payload_shape() {
        let at = DateTime::parse_from_rfc3339("2025-02-21T15:35:08Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut state = CurrentPriceState::new("BTCUSDT", at);
        state.id = 7;
        state.record(100.0, prices(&[(ExchangeId::Binance, 100.0)]), at);

        let json = serde_json::to_value(state.payload()).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["pair"], "BTCUSDT");
        assert_eq!(json["price"], 100.0);
        assert_eq!(json["previous_price"], 0.0);
        assert_eq!(json["exchanges"], serde_json::json!(["binance"]));
        assert!(json["is_increasing"].is_null());
        assert_eq!(json["updated_at"], "2025-02-21T15:35:08+00:00");
    }
}
