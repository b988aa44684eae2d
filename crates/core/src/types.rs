//! Core type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Supported exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeId {
    Binance,
    Mexc,
    Huobi,
}

impl ExchangeId {
    pub const ALL: [ExchangeId; 3] = [ExchangeId::Binance, ExchangeId::Mexc, ExchangeId::Huobi];

    pub fn name(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "binance",
            ExchangeId::Mexc => "mexc",
            ExchangeId::Huobi => "huobi",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ExchangeId::Binance => "https://api.binance.com/api/v3",
            ExchangeId::Mexc => "https://api.mexc.com/api/v3",
            ExchangeId::Huobi => "https://api.huobi.pro",
        }
    }

    /// Requests per second the exchange tolerates from a single client
    pub fn rate_limit(&self) -> u32 {
        match self {
            ExchangeId::Binance => 20,
            ExchangeId::Mexc => 20,
            ExchangeId::Huobi => 20,
        }
    }

    /// Parse a comma-separated exchange list, e.g. "binance, mexc,huobi".
    /// Unknown names are returned separately so callers can log them.
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> (Vec<ExchangeId>, Vec<String>) {
        let mut known = Vec::new();
        let mut unknown = Vec::new();

        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            match name.parse::<ExchangeId>() {
                Ok(id) if !known.contains(&id) => known.push(id),
                Ok(_) => {}
                Err(_) => unknown.push(name.to_string()),
            }
        }

        (known, unknown)
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ExchangeId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(ExchangeId::Binance),
            "mexc" => Ok(ExchangeId::Mexc),
            "huobi" | "htx" => Ok(ExchangeId::Huobi),
            other => Err(CoreError::UnknownExchange(other.to_string())),
        }
    }
}

/// Derived health of an exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeHealth {
    Unknown,
    Healthy,
    Unhealthy,
}

/// Mutable bookkeeping for one configured exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeStatus {
    pub exchange: ExchangeId,
    pub is_active: bool,
    pub health: ExchangeHealth,
    pub last_fetch_at: Option<DateTime<Utc>>,
    pub last_successful_fetch_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl ExchangeStatus {
    pub fn new(exchange: ExchangeId) -> Self {
        Self {
            exchange,
            is_active: true,
            health: ExchangeHealth::Unknown,
            last_fetch_at: None,
            last_successful_fetch_at: None,
            consecutive_failures: 0,
        }
    }

    pub fn record_attempt(&mut self, success: bool, at: DateTime<Utc>) {
        self.last_fetch_at = Some(at);
        if success {
            self.last_successful_fetch_at = Some(at);
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
    }

    pub fn set_health(&mut self, healthy: bool) {
        self.health = if healthy {
            ExchangeHealth::Healthy
        } else {
            ExchangeHealth::Unhealthy
        };
    }

    pub fn is_healthy(&self) -> bool {
        self.is_active && self.health == ExchangeHealth::Healthy
    }
}
