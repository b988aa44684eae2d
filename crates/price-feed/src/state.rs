//! Keyed price slots for the decoupled job mode
//!
//! Each (pair, exchange) job writes its latest reading into its own slot.
//! Aggregation reads every fresh slot for a pair; slots older than the TTL
//! count as absent.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pricehub_core::{chrono_duration, normalize_symbol, Clock, ExchangeId, PricePoint};

/// Key for slot lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub pair: String,
    pub exchange: ExchangeId,
}

impl SlotKey {
    pub fn new(pair: &str, exchange: ExchangeId) -> Self {
        Self {
            pair: normalize_symbol(pair),
            exchange,
        }
    }

    /// External cache key format
    pub fn cache_key(&self) -> String {
        format!("crypto_price_data_{}_{}", self.pair, self.exchange)
    }
}

/// Timestamped slot entry
#[derive(Debug, Clone)]
pub struct SlotEntry {
    pub price: f64,
    pub point: Option<PricePoint>,
    pub stored_at: DateTime<Utc>,
}

impl SlotEntry {
    pub fn is_stale(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.stored_at >= chrono_duration(ttl)
    }
}

#[derive(Debug)]
pub struct SlotStore {
    slots: DashMap<SlotKey, SlotEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,

    update_count: AtomicU64,
    last_update: RwLock<Option<DateTime<Utc>>>,
}

impl SlotStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: DashMap::new(),
            ttl,
            clock,
            update_count: AtomicU64::new(0),
            last_update: RwLock::new(None),
        }
    }

    /// Store a full reading. Non-positive or non-finite prices are refused.
    pub fn put_point(&self, point: PricePoint) -> bool {
        let key = SlotKey::new(&point.symbol, point.exchange);
        let price = point.price;
        self.put_entry(key, price, Some(point))
    }

    /// Store a bare last-trade price
    pub fn put_price(&self, pair: &str, exchange: ExchangeId, price: f64) -> bool {
        self.put_entry(SlotKey::new(pair, exchange), price, None)
    }

    fn put_entry(&self, key: SlotKey, price: f64, point: Option<PricePoint>) -> bool {
        if !price.is_finite() || price <= 0.0 {
            return false;
        }

        let now = self.clock.now();
        self.slots.insert(
            key,
            SlotEntry {
                price,
                point,
                stored_at: now,
            },
        );
        self.update_count.fetch_add(1, Ordering::Relaxed);
        *self.last_update.write() = Some(now);
        true
    }

    /// Fresh slot for the key, if any
    pub fn get(&self, pair: &str, exchange: ExchangeId) -> Option<SlotEntry> {
        let now = self.clock.now();
        self.slots
            .get(&SlotKey::new(pair, exchange))
            .filter(|e| !e.is_stale(now, self.ttl))
            .map(|e| e.value().clone())
    }

    /// Every fresh slot for a pair, keyed by exchange
    pub fn collect_pair(&self, pair: &str) -> BTreeMap<ExchangeId, SlotEntry> {
        let pair = normalize_symbol(pair);
        let now = self.clock.now();

        self.slots
            .iter()
            .filter(|e| e.key().pair == pair && !e.value().is_stale(now, self.ttl))
            .map(|e| (e.key().exchange, e.value().clone()))
            .collect()
    }

    /// Clean up stale entries
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let before = self.slots.len();
        self.slots.retain(|_, v| !v.is_stale(now, self.ttl));
        before - self.slots.len()
    }

    pub fn stats(&self) -> SlotStoreStats {
        SlotStoreStats {
            slot_count: self.slots.len(),
            update_count: self.update_count.load(Ordering::Relaxed),
            last_update: *self.last_update.read(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlotStoreStats {
    pub slot_count: usize,
    pub update_count: u64,
    pub last_update: Option<DateTime<Utc>>,
}
