//! Short-lived response cache shared by all exchange clients
//!
//! Keyed by (exchange, endpoint, params). Absorbs bursts of identical
//! requests; staleness is bounded by the TTL instead of strict consistency.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pricehub_core::{chrono_duration, Clock, ExchangeId};

/// Cache key for one request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub exchange: ExchangeId,
    pub endpoint: String,
    pub params: String,
}

impl CacheKey {
    pub fn new(exchange: ExchangeId, endpoint: &str, params: &[(&str, String)]) -> Self {
        // Param order must not change the key
        let mut sorted: Vec<_> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        sorted.sort();

        Self {
            exchange,
            endpoint: endpoint.to_string(),
            params: sorted.join("&"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub body: serde_json::Value,
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<CacheKey, CachedResponse>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Fresh body for the key, if any. Expired entries are evicted on read.
    pub fn get(&self, key: &CacheKey) -> Option<serde_json::Value> {
        let now = self.clock.now();

        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.body.clone());
            }
        }

        self.entries.remove_if(key, |_, v| v.expires_at <= now);
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: CacheKey, body: serde_json::Value) {
        if self.ttl.is_zero() {
            return;
        }

        let stored_at = self.clock.now();
        self.entries.insert(
            key,
            CachedResponse {
                body,
                stored_at,
                expires_at: stored_at + chrono_duration(self.ttl),
            },
        );
    }

    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, v| v.expires_at > now);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use pricehub_core::ManualClock;
    use serde_json::json;

    fn cache_with_clock(ttl_secs: u64) -> (ResponseCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = ResponseCache::new(Duration::from_secs(ttl_secs), clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_key_ignores_param_order() {
        let a = CacheKey::new(
            ExchangeId::Binance,
            "/ticker/24hr",
            &[("symbol", "BTCUSDT".into()), ("type", "FULL".into())],
        );
        let b = CacheKey::new(
            ExchangeId::Binance,
            "/ticker/24hr",
            &[("type", "FULL".into()), ("symbol", "BTCUSDT".into())],
        );
        assert_eq!(a, b);

        let other = CacheKey::new(ExchangeId::Mexc, "/ticker/24hr", &[("symbol", "BTCUSDT".into())]);
        assert_ne!(a, other);
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let (cache, clock) = cache_with_clock(5);
        let key = CacheKey::new(ExchangeId::Huobi, "/market/detail/merged", &[]);

        cache.insert(key.clone(), json!({"status": "ok"}));
        assert_eq!(cache.get(&key), Some(json!({"status": "ok"})));

        clock.advance(ChronoDuration::seconds(4));
        assert!(cache.get(&key).is_some());

        clock.advance(ChronoDuration::seconds(2));
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().hits, 2);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_zero_ttl_disables_caching() {
        let (cache, _clock) = cache_with_clock(0);
        let key = CacheKey::new(ExchangeId::Binance, "/ping", &[]);
        cache.insert(key.clone(), json!({}));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_purge_expired() {
        let (cache, clock) = cache_with_clock(5);
        cache.insert(CacheKey::new(ExchangeId::Binance, "/a", &[]), json!(1));
        clock.advance(ChronoDuration::seconds(3));
        cache.insert(CacheKey::new(ExchangeId::Binance, "/b", &[]), json!(2));
        clock.advance(ChronoDuration::seconds(3));

        cache.purge_expired();
        assert_eq!(cache.stats().entries, 1);
    }
}
