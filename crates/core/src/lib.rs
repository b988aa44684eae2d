//! Core types and utilities for the price aggregator
//!
//! This crate provides shared types used across all components:
//! - Exchange and trading pair definitions
//! - Per-exchange price points and aggregate snapshots
//! - Tracked per-pair price state and its wire payloads
//! - Configuration and error types

pub mod types;
pub mod pairs;
pub mod prices;
pub mod snapshots;
pub mod state;
pub mod events;
pub mod config;
pub mod errors;
pub mod clock;

pub use types::*;
pub use pairs::*;
pub use prices::*;
pub use snapshots::*;
pub use state::*;
pub use events::*;
pub use config::*;
pub use errors::*;
pub use clock::*;
