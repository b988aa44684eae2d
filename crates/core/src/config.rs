//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::{CoreError, ExchangeId, TradingPair, DEFAULT_PAIRS};

/// How the daemon drives fetching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// One fan-out fetch + aggregate + publish pass per interval
    Cycle,
    /// Independent per-(pair, exchange) jobs writing to keyed slots
    Jobs,
}

impl Default for RunMode {
    fn default() -> Self {
        RunMode::Cycle
    }
}

/// Per-exchange endpoint override
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeEndpoint {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Restrict the pairs this exchange is asked for
    pub pairs: Option<Vec<String>>,
}

/// HTTP behavior shared by all exchange clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub request_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub cache_ttl_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            cache_ttl_secs: 5,
            user_agent: "CryptoAggregator/1.0".to_string(),
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Complete aggregator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorSettings {
    pub pairs: Vec<String>,
    pub exchanges: Vec<String>,
    /// Seconds between cycle starts
    pub fetch_interval: u64,
    /// Response cache TTL in seconds
    pub cache_ttl: u64,
    /// Decoupled-mode slot TTL in seconds
    pub slot_ttl: u64,
    /// Per-cycle fetch budget in seconds
    pub global_timeout: u64,
    pub request_timeout: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Floor for the delay before the next cycle, in seconds
    pub min_delay: u64,
    pub max_concurrency: usize,
    pub mode: RunMode,
    pub publish_unchanged: bool,
    pub exchange_endpoints: HashMap<String, ExchangeEndpoint>,
    /// Per-exchange cadence in seconds for `jobs` mode
    pub exchange_intervals: HashMap<String, u64>,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            pairs: DEFAULT_PAIRS.iter().map(|s| s.to_string()).collect(),
            exchanges: ExchangeId::ALL.iter().map(|e| e.name().to_string()).collect(),
            fetch_interval: 5,
            cache_ttl: 5,
            slot_ttl: 300,
            global_timeout: 10,
            request_timeout: 10,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            min_delay: 1,
            max_concurrency: 32,
            mode: RunMode::Cycle,
            publish_unchanged: true,
            exchange_endpoints: HashMap::new(),
            exchange_intervals: HashMap::new(),
        }
    }
}

impl AggregatorSettings {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.pairs.iter().all(|p| p.trim().is_empty()) {
            return Err(CoreError::InvalidConfig("no trading pairs configured".into()));
        }
        if self.exchanges.iter().all(|e| e.trim().is_empty()) {
            return Err(CoreError::InvalidConfig("no exchanges configured".into()));
        }
        if self.fetch_interval == 0 {
            return Err(CoreError::InvalidConfig("fetch_interval must be positive".into()));
        }
        if self.global_timeout == 0 {
            return Err(CoreError::InvalidConfig("global_timeout must be positive".into()));
        }
        if self.retry_attempts == 0 {
            return Err(CoreError::InvalidConfig("retry_attempts must be at least 1".into()));
        }
        if self.max_concurrency == 0 {
            return Err(CoreError::InvalidConfig("max_concurrency must be at least 1".into()));
        }
        Ok(())
    }

    /// Parse configured pair strings, deduplicated by symbol
    pub fn trading_pairs(&self) -> Result<Vec<TradingPair>, CoreError> {
        let mut pairs: Vec<TradingPair> = Vec::new();
        for raw in self.pairs.iter().filter(|p| !p.trim().is_empty()) {
            let pair = TradingPair::parse(raw)?;
            if !pairs.iter().any(|p| p.symbol == pair.symbol) {
                pairs.push(pair);
            }
        }
        Ok(pairs)
    }

    pub fn http(&self) -> HttpConfig {
        HttpConfig {
            request_timeout_secs: self.request_timeout,
            retry_attempts: self.retry_attempts,
            retry_delay_ms: self.retry_delay_ms,
            cache_ttl_secs: self.cache_ttl,
            ..HttpConfig::default()
        }
    }

    pub fn endpoint_for(&self, exchange: ExchangeId) -> ExchangeEndpoint {
        self.exchange_endpoints
            .get(exchange.name())
            .cloned()
            .unwrap_or_default()
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval)
    }

    pub fn interval_for(&self, exchange: ExchangeId) -> Duration {
        Duration::from_secs(
            self.exchange_intervals
                .get(exchange.name())
                .copied()
                .filter(|secs| *secs > 0)
                .unwrap_or(self.fetch_interval),
        )
    }

    pub fn global_timeout(&self) -> Duration {
        Duration::from_secs(self.global_timeout)
    }

    pub fn slot_ttl(&self) -> Duration {
        Duration::from_secs(self.slot_ttl)
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_secs(self.min_delay)
    }
}
