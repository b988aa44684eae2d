//! Exchange price feeds
//!
//! Features:
//! - REST clients for Binance, MEXC and Huobi behind one `ExchangeClient` trait
//! - Shared response cache with a short TTL
//! - Retry on transient failures
//! - Health-tracked exchange registry
//! - Keyed price slots for independently scheduled fetch jobs

pub mod cache;
pub mod exchanges;
pub mod http;
pub mod registry;
pub mod state;

#[cfg(any(test, feature = "test-util"))]
pub mod stub;

pub use cache::{CacheKey, CacheStats, ResponseCache};
pub use exchanges::{ClientConfig, Exchange, ExchangeClient};
pub use http::{ExchangeRequest, RequestExecutor, HEALTH_PING_TIMEOUT};
pub use registry::{build_exchanges, ExchangeRegistry, DEFAULT_HEALTH_BUDGET};
pub use state::{SlotEntry, SlotKey, SlotStore};
