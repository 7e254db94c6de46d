use crate::logic::{TrackedSlot, WindowConfig};
use crate::utils::config_loader::LoadConfigError;
use crate::utils::constants::DEFAULT_TRACKED_DECIMALS;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// One pool on one chain, harvested independently of all others
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceDescriptor {
    /// Key of this source in the persisted document
    pub id: String,
    pub name: String,
    pub pool_address: Address,
    /// Candidate endpoints, in order of preference
    pub rpc_urls: Vec<String>,
    /// Average seconds between blocks
    pub block_time_secs: f64,
    pub tracked_slot: TrackedSlot,
    #[serde(default = "default_tracked_decimals")]
    pub tracked_decimals: u8,
    pub paired_asset: String,
    pub paired_decimals: u8,
    #[serde(default)]
    pub scan: ScanTuning,
    #[serde(default)]
    pub windows: WindowConfig,
}

fn default_tracked_decimals() -> u8 {
    DEFAULT_TRACKED_DECIMALS
}

impl SourceDescriptor {
    /// Reject descriptors the harvester can't work with
    pub fn validate(&self) -> Result<(), LoadConfigError> {
        let invalid = |reason: String| Err(LoadConfigError::ConfigError(format!("source {}: {}", self.id, reason)));

        if self.id.is_empty() {
            return Err(LoadConfigError::ConfigError("source with empty id".to_string()));
        }
        if self.rpc_urls.is_empty() {
            return invalid("no rpc_urls".to_string());
        }
        for rpc_url in &self.rpc_urls {
            if let Err(e) = Url::parse(rpc_url) {
                return invalid(format!("invalid rpc url {}: {}", rpc_url, e));
            }
        }
        if !self.block_time_secs.is_finite() || self.block_time_secs <= 0.0 {
            return invalid(format!("block_time_secs must be positive, got {}", self.block_time_secs));
        }
        if self.windows.short_days > self.windows.long_days {
            return invalid("short window is longer than the long window".to_string());
        }
        self.scan.validate().or_else(invalid)
    }
}

/// Knobs of the adaptive chunking loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanTuning {
    /// Chunk size a scan starts with
    pub initial_range: u64,
    /// Halving never goes below this
    pub min_range: u64,
    /// Chunk size restored, at least, after switching endpoint
    pub rotation_range_reset: u64,
    pub pacing_delay_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Failed attempts without progress before a chunk is given up
    pub max_stalled_attempts: u32,
}

impl Default for ScanTuning {
    fn default() -> Self {
        Self {
            initial_range: 5_000,
            min_range: 500,
            rotation_range_reset: 2_000,
            pacing_delay_ms: 50,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            max_stalled_attempts: 30,
        }
    }
}

impl ScanTuning {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_range == 0 {
            return Err("min_range must be at least 1".to_string());
        }
        if self.min_range > self.initial_range {
            return Err(format!("min_range {} exceeds initial_range {}", self.min_range, self.initial_range));
        }
        if self.max_stalled_attempts == 0 {
            return Err("max_stalled_attempts must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    /// Exponential backoff for the n-th consecutive failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay_ms = self.backoff_base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay_ms.min(self.backoff_max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::config_loader::parse_config;

    const SOURCE_TOML: &str = r#"
        id = "bsc"
        name = "BSC"
        pool_address = "0x351A295AfBAB020Bc7eedcB7fd5A823c01A95Fda"
        rpc_urls = ["https://bsc.drpc.org", "https://1rpc.io/bnb"]
        block_time_secs = 3
        tracked_slot = "first"
        paired_asset = "BUSD"
        paired_decimals = 18

        [scan]
        initial_range = 4000
    "#;

    #[test]
    fn test_parse_descriptor_with_defaults() {
        let source: SourceDescriptor = parse_config(SOURCE_TOML).unwrap();
        assert_eq!(source.tracked_slot, TrackedSlot::First);
        assert_eq!(source.tracked_decimals, 18);
        assert_eq!(source.scan.initial_range, 4000);
        assert_eq!(source.scan.min_range, 500);
        assert_eq!(source.windows, WindowConfig::default());
        assert_eq!(source.block_time_secs, 3.0);
        source.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_descriptors() {
        let source: SourceDescriptor = parse_config(SOURCE_TOML).unwrap();

        let mut no_urls = source.clone();
        no_urls.rpc_urls.clear();
        assert!(no_urls.validate().is_err());

        let mut bad_url = source.clone();
        bad_url.rpc_urls.push("bsc node".to_string());
        assert!(bad_url.validate().is_err());

        let mut zero_block_time = source.clone();
        zero_block_time.block_time_secs = 0.0;
        assert!(zero_block_time.validate().is_err());

        let mut inverted = source.clone();
        inverted.scan.min_range = inverted.scan.initial_range + 1;
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_backoff_is_capped() {
        let tuning = ScanTuning::default();
        assert_eq!(tuning.backoff(1), Duration::from_secs(1));
        assert_eq!(tuning.backoff(2), Duration::from_secs(2));
        assert_eq!(tuning.backoff(4), Duration::from_secs(8));
        assert_eq!(tuning.backoff(10), Duration::from_secs(30));
        assert_eq!(tuning.backoff(u32::MAX), Duration::from_secs(30));
    }
}
