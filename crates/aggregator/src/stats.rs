//! Aggregate statistics across exchanges

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use pricehub_core::{AggregateSnapshot, ExchangeDetail, ExchangePrices, PricePoint};

/// Combine one pair's readings into a snapshot.
///
/// Only valid readings contribute. Weighting is by volume; when the total
/// volume is zero or overflows, the plain mean of prices is used instead. High and low are
/// the extremes of the contributing prices, and the snapshot change is the
/// mean of each source's own reported change. No valid input yields an empty
/// snapshot.
pub fn combine(prices: &ExchangePrices, calculated_at: DateTime<Utc>) -> AggregateSnapshot {
    let valid: Vec<&PricePoint> = prices
        .values()
        .filter(|p| PricePoint::check_valid(p.price, p.volume))
        .collect();

    if valid.is_empty() {
        if !prices.is_empty() {
            warn!(inputs = prices.len(), "no valid prices found for aggregation");
        }
        return AggregateSnapshot::empty(calculated_at);
    }

    let count = valid.len() as f64;
    let total_volume: f64 = valid.iter().map(|p| p.volume).sum();

    let average_price = if total_volume.is_finite() && total_volume > 0.0 {
        valid.iter().map(|p| p.price * (p.volume / total_volume)).sum()
    } else {
        valid.iter().map(|p| p.price).sum::<f64>() / count
    };

    let high_price = valid.iter().map(|p| p.price).fold(f64::MIN, f64::max);
    let low_price = valid.iter().map(|p| p.price).fold(f64::MAX, f64::min);

    let price_change = valid.iter().map(|p| p.price_change).sum::<f64>() / count;
    let price_change_percent = valid.iter().map(|p| p.price_change_percent).sum::<f64>() / count;

    AggregateSnapshot {
        // Weighted sums can drift an ulp outside the range
        average_price: average_price.clamp(low_price, high_price),
        high_price,
        low_price,
        price_change,
        price_change_percent,
        volume: total_volume,
        number_of_sources: valid.len(),
        exchange_ids: valid.iter().map(|p| p.exchange).collect(),
        exchange_data: valid
            .iter()
            .map(|p| ExchangeDetail {
                name: p.exchange,
                price: p.price,
                high: p.high,
                low: p.low,
                volume: p.volume,
                change: p.price_change,
                change_percent: p.price_change_percent,
            })
            .collect(),
        calculated_at,
    }
}

/// [`combine`] stamped with the current time
pub fn calculate_aggregate_statistics(prices: &ExchangePrices) -> AggregateSnapshot {
    combine(prices, Utc::now())
}

/// Mean of the positive finite prices, `None` when there are none
pub fn average_price<I>(prices: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = prices
        .into_iter()
        .filter(|p| p.is_finite() && *p > 0.0)
        .fold((0.0, 0usize), |(sum, count), p| (sum + p, count + 1));

    (count > 0).then(|| sum / count as f64)
}

/// [`average_price`] over loosely typed values: numbers and numeric strings
/// count, anything else is skipped.
pub fn average_price_values(values: &[Value]) -> Option<f64> {
    average_price(values.iter().filter_map(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }))
}
