//! Aggregate snapshot types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::{CoreError, ExchangeId};

/// Per-exchange detail kept on a snapshot for downstream display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeDetail {
    pub name: ExchangeId,
    pub price: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub change: f64,
    pub change_percent: f64,
}

/// Combined, volume-weighted view across exchanges for one pair at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub average_price: f64,
    /// Highest price across sources (not each source's own 24h high)
    pub high_price: f64,
    /// Lowest price across sources
    pub low_price: f64,
    /// Mean of the per-source reported changes
    pub price_change: f64,
    pub price_change_percent: f64,
    pub volume: f64,
    pub number_of_sources: usize,
    pub exchange_ids: Vec<ExchangeId>,
    pub exchange_data: Vec<ExchangeDetail>,
    pub calculated_at: DateTime<Utc>,
}

impl AggregateSnapshot {
    /// Snapshot for a pair with no valid sources
    pub fn empty(calculated_at: DateTime<Utc>) -> Self {
        Self {
            average_price: 0.0,
            high_price: 0.0,
            low_price: 0.0,
            price_change: 0.0,
            price_change_percent: 0.0,
            volume: 0.0,
            number_of_sources: 0,
            exchange_ids: vec![],
            exchange_data: vec![],
            calculated_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.number_of_sources == 0
    }

    pub fn formatted_price_change(&self) -> String {
        let sign = if self.price_change >= 0.0 { "+" } else { "" };
        format!("{sign}{:.8}", self.price_change)
    }

    pub fn formatted_price_change_percent(&self) -> String {
        let sign = if self.price_change_percent >= 0.0 { "+" } else { "" };
        format!("{sign}{:.2}%", self.price_change_percent)
    }

    /// Display strings per exchange
    pub fn exchange_details(&self) -> BTreeMap<ExchangeId, FormattedDetail> {
        self.exchange_data
            .iter()
            .map(|d| {
                (
                    d.name,
                    FormattedDetail {
                        price: format!("{:.8}", d.price),
                        volume: format!("{:.2}", d.volume),
                        change: format!("{:.8}", d.change),
                        change_percent: format!("{:.2}%", d.change_percent),
                    },
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedDetail {
    pub price: String,
    pub volume: String,
    pub change: String,
    pub change_percent: String,
}

/// Snapshot as stored: tagged with its pair and a row id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub id: u64,
    pub pair: String,
    #[serde(flatten)]
    pub snapshot: AggregateSnapshot,
}

/// History window for read-side queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryPeriod {
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

impl HistoryPeriod {
    pub fn duration(&self) -> Duration {
        match self {
            HistoryPeriod::Hour => Duration::hours(1),
            HistoryPeriod::Day => Duration::days(1),
            HistoryPeriod::Week => Duration::days(7),
            HistoryPeriod::Month => Duration::days(30),
        }
    }

    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }
}

impl Default for HistoryPeriod {
    fn default() -> Self {
        HistoryPeriod::Day
    }
}

impl FromStr for HistoryPeriod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(HistoryPeriod::Hour),
            "24h" => Ok(HistoryPeriod::Day),
            "7d" => Ok(HistoryPeriod::Week),
            "30d" => Ok(HistoryPeriod::Month),
            other => Err(CoreError::InvalidConfig(format!("unknown history period: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot() {
        let snap = AggregateSnapshot::empty(Utc::now());
        assert!(snap.is_empty());
        assert_eq!(snap.average_price, 0.0);
        assert!(snap.exchange_data.is_empty());
    }

    #[test]
    fn test_formatting() {
        let mut snap = AggregateSnapshot::empty(Utc::now());
        snap.price_change = 12.5;
        snap.price_change_percent = -1.234;
        assert_eq!(snap.formatted_price_change(), "+12.50000000");
        assert_eq!(snap.formatted_price_change_percent(), "-1.23%");

        snap.exchange_data.push(ExchangeDetail {
            name: ExchangeId::Mexc,
            price: 1.5,
            high: 2.0,
            low: 1.0,
            volume: 10.0,
            change: 0.1,
            change_percent: 7.0,
        });
        let details = snap.exchange_details();
        assert_eq!(details[&ExchangeId::Mexc].volume, "10.00");
        assert_eq!(details[&ExchangeId::Mexc].change_percent, "7.00%");
    }

    #[test]
    fn test_history_period() {
        assert_eq!("7d".parse::<HistoryPeriod>().unwrap(), HistoryPeriod::Week);
        assert!("2w".parse::<HistoryPeriod>().is_err());
        let now = Utc::now();
        assert_eq!(HistoryPeriod::Hour.since(now), now - Duration::hours(1));
    }
}
