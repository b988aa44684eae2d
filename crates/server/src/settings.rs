//! Layered settings: defaults, optional TOML file, `CRYPTO_` environment

use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use pricehub_core::{AggregatorSettings, CoreError};

pub const DEFAULT_CONFIG_PATH: &str = "config/pricehub.toml";
pub const ENV_PREFIX: &str = "CRYPTO";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error(transparent)]
    Invalid(#[from] CoreError),
}

#[derive(Debug, Clone)]
pub struct SettingsLoader {
    file: PathBuf,
    env_prefix: String,
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_CONFIG_PATH),
            env_prefix: ENV_PREFIX.to_string(),
        }
    }
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = path.into();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Build and validate. Lists in the environment are comma separated,
    /// nested keys use `__`, e.g. `CRYPTO_EXCHANGE_ENDPOINTS__BINANCE__BASE_URL`.
    pub fn load(&self) -> Result<AggregatorSettings, SettingsError> {
        let mut builder = Config::builder();

        if self.file.exists() {
            info!(path = %self.file.display(), "loading configuration file");
            builder = builder.add_source(File::from(self.file.as_path()).format(FileFormat::Toml).required(true));
        } else {
            warn!(
                path = %self.file.display(),
                "configuration file not found, using defaults and environment"
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("pairs")
                .with_list_parse_key("exchanges"),
        );

        let settings: AggregatorSettings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pricehub_core::{ExchangeId, RunMode};
    use std::io::Write;
    use std::time::Duration;

    fn missing_file() -> PathBuf {
        std::env::temp_dir().join("pricehub-settings-missing.toml")
    }

    #[test]
    fn test_defaults_without_sources() {
        let settings = SettingsLoader::new()
            .with_file(missing_file())
            .with_env_prefix("PRICEHUB_TEST_NONE")
            .load()
            .unwrap();

        assert_eq!(settings.pairs, vec!["BTCUSDC", "BTCUSDT", "ETHBTC"]);
        assert_eq!(settings.exchanges, vec!["binance", "mexc", "huobi"]);
        assert_eq!(settings.fetch_interval, 5);
        assert_eq!(settings.mode, RunMode::Cycle);
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("PRICEHUB_TEST_ENV_PAIRS", "BTCUSDT,ETHBTC");
        std::env::set_var("PRICEHUB_TEST_ENV_EXCHANGES", "binance,huobi");
        std::env::set_var("PRICEHUB_TEST_ENV_FETCH_INTERVAL", "15");
        std::env::set_var("PRICEHUB_TEST_ENV_MODE", "jobs");
        std::env::set_var(
            "PRICEHUB_TEST_ENV_EXCHANGE_ENDPOINTS__BINANCE__BASE_URL",
            "http://localhost:9000",
        );

        let settings = SettingsLoader::new()
            .with_file(missing_file())
            .with_env_prefix("PRICEHUB_TEST_ENV")
            .load()
            .unwrap();

        assert_eq!(settings.pairs, vec!["BTCUSDT", "ETHBTC"]);
        assert_eq!(settings.exchanges, vec!["binance", "huobi"]);
        assert_eq!(settings.fetch_interval(), Duration::from_secs(15));
        assert_eq!(settings.mode, RunMode::Jobs);
        assert_eq!(
            settings.endpoint_for(ExchangeId::Binance).base_url.as_deref(),
            Some("http://localhost:9000")
        );
    }

    #[test]
    fn test_file_source_and_validation() {
        let path = std::env::temp_dir().join(format!("pricehub-settings-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
pairs = ["BTCUSDT"]
global_timeout = 3
publish_unchanged = false

[exchange_intervals]
huobi = 20
"#
        )
        .unwrap();

        let settings = SettingsLoader::new()
            .with_file(&path)
            .with_env_prefix("PRICEHUB_TEST_FILE")
            .load()
            .unwrap();
        assert_eq!(settings.global_timeout(), Duration::from_secs(3));
        assert!(!settings.publish_unchanged);
        assert_eq!(settings.interval_for(ExchangeId::Huobi), Duration::from_secs(20));

        std::fs::write(&path, "fetch_interval = 0\n").unwrap();
        let result = SettingsLoader::new()
            .with_file(&path)
            .with_env_prefix("PRICEHUB_TEST_FILE")
            .load();
        assert!(matches!(result, Err(SettingsError::Invalid(_))));

        std::fs::remove_file(&path).ok();
    }
}
