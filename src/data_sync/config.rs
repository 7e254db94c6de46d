use super::source::SourceDescriptor;
use crate::utils::config_loader::{ConfigSectionLoader, LoadConfigError, load_from_file};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

/// Settings of a harvest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarvestConfig {
    /// Where the aggregate document lives
    pub state_path: String,
    /// Sources already present in the document are not scanned again
    pub skip_existing: bool,
    /// Sources stored with unresolved gaps are scanned again
    pub retry_incomplete: bool,
    /// How many sources are harvested at the same time
    pub max_parallel_sources: usize,
    /// Liveness probe timeout in seconds
    pub probe_timeout_secs: u64,
    /// Timeout of a single RPC request in seconds
    pub request_timeout_secs: u64,
    /// Ticker endpoint for the tracked asset's USD price
    pub price_url: Option<String>,
    /// Price used when the ticker can't be reached
    pub fallback_price: Option<f64>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            state_path: "wban_analytics_data.json".to_string(),
            skip_existing: true,
            retry_incomplete: false,
            max_parallel_sources: 1,
            probe_timeout_secs: 10,
            request_timeout_secs: 30,
            price_url: Some("https://api.coinex.com/v1/market/ticker?market=BANANOUSDT".to_string()),
            fallback_price: None,
        }
    }
}

impl HarvestConfig {
    /// Apply `HARVEST_*` environment overrides
    pub fn with_env_overrides(mut self) -> eyre::Result<Self> {
        if let Ok(state_path) = std::env::var("HARVEST_STATE_PATH") {
            self.state_path = state_path;
        }

        if let Ok(max_parallel_str) = std::env::var("HARVEST_MAX_PARALLEL") {
            self.max_parallel_sources =
                max_parallel_str.parse().map_err(|e| eyre::eyre!("Invalid HARVEST_MAX_PARALLEL: {}", e))?;
        }

        if let Ok(price_url) = std::env::var("HARVEST_PRICE_URL") {
            Url::parse(&price_url).map_err(|e| eyre::eyre!("Invalid HARVEST_PRICE_URL: {}", e))?;
            self.price_url = Some(price_url);
        }

        Ok(self)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Settings of the report server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Document to serve; the harvest `state_path` when unset
    pub state_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: "127.0.0.1:5001".to_string(), state_path: None }
    }
}

impl ServerConfig {
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(bind_address) = std::env::var("HARVEST_BIND_ADDRESS") {
            self.bind_address = bind_address;
        }
        self
    }
}

/// The whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), LoadConfigError> {
        if self.harvest.max_parallel_sources == 0 {
            return Err(LoadConfigError::ConfigError("max_parallel_sources must be at least 1".to_string()));
        }
        if let Some(price_url) = &self.harvest.price_url {
            Url::parse(price_url)
                .map_err(|e| LoadConfigError::ConfigError(format!("invalid price_url {}: {}", price_url, e)))?;
        }

        let mut ids = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !ids.insert(source.id.as_str()) {
                return Err(LoadConfigError::ConfigError(format!("duplicate source id {}", source.id)));
            }
        }
        Ok(())
    }

    /// Path of the document the server reads
    pub fn served_state_path(&self) -> &str {
        self.server.state_path.as_deref().unwrap_or(&self.harvest.state_path)
    }

    pub fn source(&self, id: &str) -> Option<&SourceDescriptor> {
        self.sources.iter().find(|source| source.id == id)
    }
}

#[async_trait]
impl ConfigSectionLoader for AppConfig {
    type SectionType = AppConfig;

    async fn load_section_from_file(file_name: String) -> Result<Self::SectionType, LoadConfigError> {
        let config: AppConfig = load_from_file(file_name).await?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::TrackedSlot;
    use crate::utils::config_loader::parse_config;

    const SAMPLE: &str = r#"
        [harvest]
        state_path = "out/state.json"
        max_parallel_sources = 2

        [server]
        bind_address = "0.0.0.0:8080"

        [[sources]]
        id = "bsc"
        name = "BSC"
        pool_address = "0x351A295AfBAB020Bc7eedcB7fd5A823c01A95Fda"
        rpc_urls = ["https://bsc-dataseed.binance.org"]
        block_time_secs = 3
        tracked_slot = "first"
        paired_asset = "BUSD"
        paired_decimals = 18

        [[sources]]
        id = "arbitrum"
        name = "Arbitrum"
        pool_address = "0xBD80923830B1B122dcE0C446b704621458329F1D"
        rpc_urls = ["https://arb1.arbitrum.io/rpc", "https://arbitrum.llamarpc.com"]
        block_time_secs = 0.25
        tracked_slot = "second"
        paired_asset = "WETH"
        paired_decimals = 18

        [sources.scan]
        initial_range = 100000
    "#;

    #[test]
    fn test_default_config() {
        let config = HarvestConfig::default();
        assert_eq!(config.state_path, "wban_analytics_data.json");
        assert!(config.skip_existing);
        assert!(!config.retry_incomplete);
        assert_eq!(config.max_parallel_sources, 1);
        assert_eq!(ServerConfig::default().bind_address, "127.0.0.1:5001");
    }

    #[test]
    fn test_durations() {
        let config = HarvestConfig::default();
        assert_eq!(config.probe_timeout(), Duration::from_secs(10));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_parse_sample() {
        let config: AppConfig = parse_config(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.harvest.max_parallel_sources, 2);
        assert!(config.harvest.skip_existing);
        assert_eq!(config.served_state_path(), "out/state.json");
        assert_eq!(config.sources.len(), 2);

        let arbitrum = config.source("arbitrum").unwrap();
        assert_eq!(arbitrum.block_time_secs, 0.25);
        assert_eq!(arbitrum.tracked_slot, TrackedSlot::Second);
        assert_eq!(arbitrum.tracked_decimals, 18);
        assert_eq!(arbitrum.scan.initial_range, 100_000);
        assert_eq!(arbitrum.scan.min_range, 500);
        assert_eq!(config.source("bsc").unwrap().scan.initial_range, 5_000);
    }

    #[test]
    fn test_shipped_config() {
        let config: AppConfig = parse_config(include_str!("../../harvest.toml")).unwrap();
        config.validate().unwrap();

        let ids: Vec<&str> = config.sources.iter().map(|source| source.id.as_str()).collect();
        assert_eq!(ids, vec!["ethereum", "polygon", "bsc", "bsc_usdc", "arbitrum"]);
        assert_eq!(config.source("bsc").unwrap().tracked_slot, TrackedSlot::First);
        assert_eq!(config.source("arbitrum").unwrap().scan.initial_range, 100_000);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut config: AppConfig = parse_config(SAMPLE).unwrap();
        let duplicate = config.sources[0].clone();
        config.sources.push(duplicate);
        assert!(matches!(config.validate(), Err(LoadConfigError::ConfigError(_))));
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let mut config: AppConfig = parse_config(SAMPLE).unwrap();
        config.harvest.max_parallel_sources = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<AppConfig, _> = parse_config("[harvest]\nstate_file = \"x.json\"\n");
        assert!(matches!(result, Err(LoadConfigError::TomlError(_))));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harvest.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = AppConfig::load_section_from_file(path.display().to_string()).await.unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.server.clone().with_env_overrides().state_path, None);
    }
}
