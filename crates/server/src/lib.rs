//! Price aggregation daemon
//!
//! Loads layered settings and runs the fetch/aggregate/publish pipeline in
//! either cycle or jobs mode.

pub mod daemon;
pub mod settings;

pub use daemon::{job_schedule, shutdown_after, Daemon};
pub use settings::{SettingsError, SettingsLoader, DEFAULT_CONFIG_PATH, ENV_PREFIX};
