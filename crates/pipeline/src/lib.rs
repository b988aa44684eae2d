//! Aggregation pipeline
//!
//! Features:
//! - Concurrent per-cycle fetch under a global deadline and concurrency cap
//! - Volume-weighted aggregation per pair
//! - Per-pair change tracking with atomic save-and-publish
//! - Decoupled per-exchange fetch jobs over keyed slots
//! - Self-scheduling cycle loop

pub mod cycle;
pub mod jobs;
pub mod publisher;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod tracker;

pub use cycle::{AggregationService, CycleReport};
pub use jobs::{JobRunner, JobSchedule};
pub use publisher::{BroadcastPublisher, PublishedEvent, UpdatePublisher};
pub use runner::{next_delay, CycleDriver, CycleRunner};
pub use scheduler::{FetchFailure, FetchOutcome, FetchScheduler, PairFetch};
pub use store::{MemoryStore, PriceStore, Retention, StoredPricePoint};
pub use tracker::{ChangeTracker, TrackerOutcome};
