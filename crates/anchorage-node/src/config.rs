//! Node configuration types
//!
//! Loaded from a TOML file, then overridden by `ANCHORAGE__SECTION__KEY`
//! environment variables (for example `ANCHORAGE__ANCHOR__QUORUM=2`).

use anchorage_bridge::BitcoinRpcConfig;
use anchorage_consensus::FinalityConfig;
use anchorage_core::constants;
use anchorage_economics::{Amount, AnchorRewardSchedule, ANCHOR_REWARD_PER_BLOCK};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "ANCHORAGE";

/// Configuration rejected by `NodeConfig::validate`
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("anchor.quorum {quorum} exceeds anchor.team_size {team_size}")]
    QuorumAboveTeamSize { quorum: usize, team_size: usize },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("devnet.local_validators {local} exceeds devnet.validators {total}")]
    TooManyLocalValidators { local: usize, total: usize },

    #[error("reward address is {0} bytes, at most 34 fit an anchor payload")]
    RewardAddressTooLong(usize),
}

/// Complete node configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node operation settings
    #[serde(default)]
    pub node: NodeSettings,

    /// Anchor finality parameters
    #[serde(default)]
    pub anchor: AnchorSettings,

    /// Community fund subsidies
    #[serde(default)]
    pub rewards: RewardSettings,

    /// External chain light client
    #[serde(default)]
    pub spv: SpvSettings,

    /// In-memory local chain
    #[serde(default)]
    pub devnet: DevnetSettings,

    /// JSON-RPC API settings
    #[serde(default)]
    pub rpc: RpcSettings,

    /// Storage settings
    #[serde(default)]
    pub storage: StorageSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl NodeConfig {
    /// Load `path` (optional) and apply environment overrides
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let loaded: Self = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Render as TOML, used to write a default config file
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let anchor = &self.anchor;
        if anchor.quorum > anchor.team_size {
            return Err(ConfigError::QuorumAboveTeamSize {
                quorum: anchor.quorum,
                team_size: anchor.team_size,
            });
        }
        if anchor.quorum == 0 {
            return Err(ConfigError::Zero("anchor.quorum"));
        }
        if anchor.frequency == 0 {
            return Err(ConfigError::Zero("anchor.frequency"));
        }
        if anchor.activation_threshold == 0 {
            return Err(ConfigError::Zero("anchor.activation_threshold"));
        }
        if let Some(address) = &anchor.reward_address {
            if address.len() > 34 {
                return Err(ConfigError::RewardAddressTooLong(address.len()));
            }
        }
        if self.devnet.block_interval_ms == 0 {
            return Err(ConfigError::Zero("devnet.block_interval_ms"));
        }
        if self.spv.poll_interval_secs == 0 {
            return Err(ConfigError::Zero("spv.poll_interval_secs"));
        }
        if let Some(local) = self.devnet.local_validators {
            if local > self.devnet.validators {
                return Err(ConfigError::TooManyLocalValidators {
                    local,
                    total: self.devnet.validators,
                });
            }
        }
        Ok(())
    }

    /// Engine parameters from the `anchor` section
    pub fn finality_config(&self) -> FinalityConfig {
        let anchor = &self.anchor;
        FinalityConfig {
            team_size: anchor.team_size,
            quorum: anchor.quorum,
            frequency: anchor.frequency,
            depth_secs: anchor.depth_secs,
            activation_threshold: anchor.activation_threshold,
            team_lookback_secs: anchor.team_lookback_secs,
            team_change_period: anchor.team_change_period,
            verify_signatures: anchor.verify_signatures,
            reward_address: anchor.reward_address.clone(),
        }
    }

    pub fn reward_schedule(&self) -> AnchorRewardSchedule {
        AnchorRewardSchedule {
            anchor_per_block: self.rewards.anchor_per_block,
            incentive_per_block: self.rewards.incentive_per_block,
        }
    }
}

/// Basic node settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Node name
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_node_name() -> String {
    "anchorage-node".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            data_dir: default_data_dir(),
        }
    }
}

/// Anchor finality parameters
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorSettings {
    #[serde(default = "default_team_size")]
    pub team_size: usize,

    #[serde(default = "default_quorum")]
    pub quorum: usize,

    /// Local blocks between anchor candidates
    #[serde(default = "default_frequency")]
    pub frequency: u64,

    /// Chain time (seconds) an anchored block must be buried under
    #[serde(default = "default_depth_secs")]
    pub depth_secs: i64,

    #[serde(default = "default_activation_threshold")]
    pub activation_threshold: u64,

    #[serde(default = "default_team_lookback_secs")]
    pub team_lookback_secs: i64,

    #[serde(default = "default_team_change_period")]
    pub team_change_period: u64,

    #[serde(default = "default_true")]
    pub verify_signatures: bool,

    /// External address nominated for rewards
    #[serde(default)]
    pub reward_address: Option<String>,
}

fn default_team_size() -> usize {
    constants::TEAM_SIZE
}

fn default_quorum() -> usize {
    constants::ANCHOR_QUORUM
}

fn default_frequency() -> u64 {
    constants::ANCHOR_FREQUENCY
}

fn default_depth_secs() -> i64 {
    constants::ANCHOR_DEPTH_SECS
}

fn default_activation_threshold() -> u64 {
    constants::ACTIVATION_THRESHOLD
}

fn default_team_lookback_secs() -> i64 {
    constants::TEAM_LOOKBACK_SECS
}

fn default_team_change_period() -> u64 {
    constants::TEAM_CHANGE_PERIOD
}

fn default_true() -> bool {
    true
}

impl Default for AnchorSettings {
    fn default() -> Self {
        Self {
            team_size: default_team_size(),
            quorum: default_quorum(),
            frequency: default_frequency(),
            depth_secs: default_depth_secs(),
            activation_threshold: default_activation_threshold(),
            team_lookback_secs: default_team_lookback_secs(),
            team_change_period: default_team_change_period(),
            verify_signatures: true,
            reward_address: None,
        }
    }
}

/// Per-block community fund subsidies, decimal coin strings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardSettings {
    #[serde(default = "default_anchor_per_block")]
    pub anchor_per_block: Amount,

    #[serde(default)]
    pub incentive_per_block: Amount,
}

fn default_anchor_per_block() -> Amount {
    Amount::from_sat(ANCHOR_REWARD_PER_BLOCK)
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            anchor_per_block: default_anchor_per_block(),
            incentive_per_block: Amount::ZERO,
        }
    }
}

/// Light client backend
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpvMode {
    /// In-memory external chain advanced by the devnet producer
    #[default]
    Fake,
    /// Bitcoin Core wallet over JSON-RPC
    Rpc,
}

/// External chain light client settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpvSettings {
    #[serde(default)]
    pub mode: SpvMode,

    /// Bitcoin Core RPC endpoint
    #[serde(default = "default_spv_url")]
    pub url: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_spv_timeout")]
    pub timeout_secs: u64,

    /// Seconds between external chain polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Starting tip of the fake external chain
    #[serde(default)]
    pub fake_start_height: u64,
}

fn default_spv_url() -> String {
    "http://127.0.0.1:18332".to_string()
}

fn default_spv_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    10
}

impl Default for SpvSettings {
    fn default() -> Self {
        Self {
            mode: SpvMode::default(),
            url: default_spv_url(),
            user: None,
            password: None,
            timeout_secs: default_spv_timeout(),
            poll_interval_secs: default_poll_interval(),
            fake_start_height: 0,
        }
    }
}

impl SpvSettings {
    pub fn rpc_config(&self) -> BitcoinRpcConfig {
        BitcoinRpcConfig {
            url: self.url.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            timeout_secs: self.timeout_secs,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// In-memory local chain settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevnetSettings {
    /// Genesis masternodes minting round-robin
    #[serde(default = "default_validators")]
    pub validators: usize,

    /// How many genesis keys this node signs with; all when unset
    #[serde(default)]
    pub local_validators: Option<usize>,

    /// Seed the genesis keys are derived from
    #[serde(default = "default_seed")]
    pub seed: String,

    /// Wall-clock milliseconds between minted blocks
    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,

    /// Chain time between consecutive blocks
    #[serde(default = "default_time_step_secs")]
    pub time_step_secs: i64,

    /// Local blocks per fake external block; 0 leaves the external tip alone
    #[serde(default = "default_external_block_every")]
    pub external_block_every: u64,
}

fn default_validators() -> usize {
    3
}

fn default_seed() -> String {
    "anchorage-devnet".to_string()
}

fn default_block_interval_ms() -> u64 {
    1000
}

fn default_time_step_secs() -> i64 {
    600
}

fn default_external_block_every() -> u64 {
    10
}

impl Default for DevnetSettings {
    fn default() -> Self {
        Self {
            validators: default_validators(),
            local_validators: None,
            seed: default_seed(),
            block_interval_ms: default_block_interval_ms(),
            time_step_secs: default_time_step_secs(),
            external_block_every: default_external_block_every(),
        }
    }
}

impl DevnetSettings {
    pub fn block_interval(&self) -> Duration {
        Duration::from_millis(self.block_interval_ms)
    }

    pub fn local_count(&self) -> usize {
        self.local_validators.unwrap_or(self.validators)
    }
}

/// RPC configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcSettings {
    /// Enable RPC
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Listen address
    #[serde(default = "default_rpc_address")]
    pub address: String,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default = "default_rpc_per_second")]
    pub requests_per_second: u32,

    #[serde(default = "default_rpc_burst")]
    pub burst: u32,
}

fn default_rpc_address() -> String {
    "127.0.0.1:9933".to_string()
}

fn default_rpc_per_second() -> u32 {
    100
}

fn default_rpc_burst() -> u32 {
    200
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_rpc_address(),
            cors_enabled: true,
            requests_per_second: default_rpc_per_second(),
            burst: default_rpc_burst(),
        }
    }
}

/// Storage configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Persist the anchor state; off keeps everything in memory
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Database directory, relative to the data directory
    #[serde(default = "default_db_dir")]
    pub db_dir: String,
}

fn default_db_dir() -> String {
    "anchors".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            db_dir: default_db_dir(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Color output
    #[serde(default = "default_true")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: true,
        }
    }
}

/// Metrics configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Enable metrics
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics address
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

fn default_metrics_address() -> String {
    "127.0.0.1:9615".to_string()
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            address: default_metrics_address(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_configuration() {
        let config = NodeConfig::default();
        let finality = config.finality_config();

        assert_eq!(finality, FinalityConfig::default());
        assert_eq!(config.rewards.anchor_per_block.to_string(), "0.10000000");
        assert_eq!(config.spv.mode, SpvMode::Fake);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: NodeConfig = toml::from_str(
            r#"
            [anchor]
            quorum = 2
            reward_address = "mwsZw8nF7pKxWH8eoKL9tPxTpaFkz7QeLU"

            [rewards]
            anchor_per_block = "0.5"

            [spv]
            mode = "rpc"
            "#,
        )
        .unwrap();

        assert_eq!(config.anchor.quorum, 2);
        assert_eq!(config.anchor.team_size, 3);
        assert_eq!(config.rewards.anchor_per_block, Amount::from_sat(50_000_000));
        assert_eq!(config.spv.mode, SpvMode::Rpc);
        assert_eq!(config.rpc, RpcSettings::default());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = NodeConfig::default();
        config.anchor.reward_address = Some("mwsZw8nF7pKxWH8eoKL9tPxTpaFkz7QeLU".to_string());
        let rendered = config.to_toml().unwrap();

        assert_eq!(toml::from_str::<NodeConfig>(&rendered).unwrap(), config);
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("anchorage.toml");
        std::fs::write(&path, "[anchor]\nfrequency = 5\n\n[devnet]\nvalidators = 4\n").unwrap();

        let config = NodeConfig::load(&path).unwrap();
        assert_eq!(config.anchor.frequency, 5);
        assert_eq!(config.devnet.validators, 4);
        assert_eq!(config.devnet.local_count(), 4);
    }

    #[test]
    fn test_validate_rejects_bad_quorum() {
        let mut config = NodeConfig::default();
        config.anchor.quorum = 4;
        assert_eq!(
            config.validate(),
            Err(ConfigError::QuorumAboveTeamSize {
                quorum: 4,
                team_size: 3
            })
        );

        config.anchor.quorum = 0;
        assert_eq!(config.validate(), Err(ConfigError::Zero("anchor.quorum")));
    }

    #[test]
    fn test_validate_rejects_long_reward_address() {
        let mut config = NodeConfig::default();
        config.anchor.reward_address = Some("x".repeat(35));
        assert_eq!(config.validate(), Err(ConfigError::RewardAddressTooLong(35)));
    }
}
