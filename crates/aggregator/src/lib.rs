//! Cross-exchange price aggregation
//!
//! Pure functions only: no I/O, no clocks beyond the timestamp handed in.
//! - Volume-weighted consensus price with an arithmetic-mean fallback
//! - Cross-source high/low and mean reported change
//! - Simple scalar average for last-trade prices

pub mod stats;

pub use stats::{average_price, average_price_values, calculate_aggregate_statistics, combine};
