//! Storage collaborator
//!
//! The pipeline only needs a handful of operations from durable storage.
//! [`MemoryStore`] is the append-only in-process implementation used by the
//! daemon and the tests. It keeps a bounded window of history, see
//! [`Retention`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use pricehub_core::{
    AggregateSnapshot, CurrentPriceState, ExchangeId, ExchangePrices, HistoryPeriod, PricePoint,
    StoreError, StoreResult, StoredSnapshot,
};

#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Write every reading and the snapshot of one pair-cycle, all or nothing.
    /// Returns the snapshot row id.
    async fn record_pair_cycle(
        &self,
        pair: &str,
        points: &ExchangePrices,
        snapshot: &AggregateSnapshot,
    ) -> StoreResult<u64>;

    async fn upsert_price_point(&self, pair: &str, exchange: ExchangeId, point: &PricePoint) -> StoreResult<()>;

    async fn upsert_aggregate_snapshot(&self, pair: &str, snapshot: &AggregateSnapshot) -> StoreResult<u64>;

    async fn load_current_state(&self, pair: &str) -> StoreResult<Option<CurrentPriceState>>;

    /// Returns the state's row id, assigning one on first save
    async fn save_current_state(&self, pair: &str, state: &CurrentPriceState) -> StoreResult<u64>;

    /// Most recent snapshot by `calculated_at`
    async fn latest_snapshot(&self, pair: &str) -> StoreResult<Option<StoredSnapshot>>;

    /// Snapshots calculated at or after `since`, oldest first
    async fn snapshot_history(&self, pair: &str, since: DateTime<Utc>) -> StoreResult<Vec<StoredSnapshot>>;
}

/// Stored reading row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPricePoint {
    pub id: u64,
    pub pair: String,
    pub point: PricePoint,
}

/// History bounds for [`MemoryStore`]. Rows older than `max_age` relative to
/// the newest write are evicted, and neither table grows past `max_rows`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Retention {
    pub max_age: chrono::Duration,
    pub max_rows: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            max_age: HistoryPeriod::Month.duration(),
            max_rows: 250_000,
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    next_id: u64,
    retention: Retention,
    price_points: VecDeque<StoredPricePoint>,
    snapshots: VecDeque<StoredSnapshot>,
    states: HashMap<String, CurrentPriceState>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn push_point(&mut self, pair: &str, point: &PricePoint) {
        let id = self.next_id();
        self.price_points.push_back(StoredPricePoint {
            id,
            pair: pair.to_string(),
            point: point.clone(),
        });

        let cutoff = point.fetched_at - self.retention.max_age;
        let max_rows = self.retention.max_rows;
        evict(&mut self.price_points, max_rows, |p| p.point.fetched_at < cutoff);
    }

    fn push_snapshot(&mut self, pair: &str, snapshot: &AggregateSnapshot) -> u64 {
        let id = self.next_id();
        self.snapshots.push_back(StoredSnapshot {
            id,
            pair: pair.to_string(),
            snapshot: snapshot.clone(),
        });

        let cutoff = snapshot.calculated_at - self.retention.max_age;
        let max_rows = self.retention.max_rows;
        evict(&mut self.snapshots, max_rows, |s| s.snapshot.calculated_at < cutoff);
        id
    }
}

/// Rows arrive roughly in time order, so expired ones sit at the front
fn evict<T>(rows: &mut VecDeque<T>, max_rows: usize, expired: impl Fn(&T) -> bool) {
    while rows.front().map_or(false, &expired) {
        rows.pop_front();
    }
    while rows.len() > max_rows.max(1) {
        rows.pop_front();
    }
}

/// Append-only in-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Retention) -> Self {
        let store = Self::default();
        store.tables.write().retention = retention;
        store
    }

    /// Make every subsequent write fail, for exercising failure paths
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self, pair: &str) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteFailed {
                pair: pair.to_string(),
                reason: "store is read-only".into(),
            });
        }
        Ok(())
    }

    pub fn price_points(&self, pair: &str) -> Vec<StoredPricePoint> {
        self.tables
            .read()
            .price_points
            .iter()
            .filter(|p| p.pair == pair)
            .cloned()
            .collect()
    }

    pub fn snapshot_count(&self, pair: &str) -> usize {
        self.tables.read().snapshots.iter().filter(|s| s.pair == pair).count()
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn record_pair_cycle(
        &self,
        pair: &str,
        points: &ExchangePrices,
        snapshot: &AggregateSnapshot,
    ) -> StoreResult<u64> {
        self.check_writable(pair)?;

        // One write guard for the whole pair-cycle
        let mut tables = self.tables.write();
        for point in points.values() {
            tables.push_point(pair, point);
        }
        Ok(tables.push_snapshot(pair, snapshot))
    }

    async fn upsert_price_point(&self, pair: &str, exchange: ExchangeId, point: &PricePoint) -> StoreResult<()> {
        self.check_writable(pair)?;
        if point.exchange != exchange {
            return Err(StoreError::WriteFailed {
                pair: pair.to_string(),
                reason: format!("reading from {} filed under {exchange}", point.exchange),
            });
        }
        self.tables.write().push_point(pair, point);
        Ok(())
    }

    async fn upsert_aggregate_snapshot(&self, pair: &str, snapshot: &AggregateSnapshot) -> StoreResult<u64> {
        self.check_writable(pair)?;
        Ok(self.tables.write().push_snapshot(pair, snapshot))
    }

    async fn load_current_state(&self, pair: &str) -> StoreResult<Option<CurrentPriceState>> {
        Ok(self.tables.read().states.get(pair).cloned())
    }

    async fn save_current_state(&self, pair: &str, state: &CurrentPriceState) -> StoreResult<u64> {
        self.check_writable(pair)?;

        let mut tables = self.tables.write();
        let id = match tables.states.get(pair) {
            Some(existing) => existing.id,
            None => tables.next_id(),
        };

        let mut saved = state.clone();
        saved.id = id;
        tables.states.insert(pair.to_string(), saved);
        Ok(id)
    }

    async fn latest_snapshot(&self, pair: &str) -> StoreResult<Option<StoredSnapshot>> {
        Ok(self
            .tables
            .read()
            .snapshots
            .iter()
            .filter(|s| s.pair == pair)
            .max_by_key(|s| (s.snapshot.calculated_at, s.id))
            .cloned())
    }

    async fn snapshot_history(&self, pair: &str, since: DateTime<Utc>) -> StoreResult<Vec<StoredSnapshot>> {
        let mut history: Vec<StoredSnapshot> = self
            .tables
            .read()
            .snapshots
            .iter()
            .filter(|s| s.pair == pair && s.snapshot.calculated_at >= since)
            .cloned()
            .collect();
        history.sort_by_key(|s| (s.snapshot.calculated_at, s.id));
        Ok(history)
    }
}
