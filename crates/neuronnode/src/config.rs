use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use networkneuron_crypto::NodeIdentity;
use networkneuron_routing::KeyScheme;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub peers: PeerSettings,
    pub routing: RoutingSettings,
    pub ledger: LedgerSettings,
    pub rewards: RewardSettings,
    pub logging: LoggingConfig,

    #[serde(skip)]
    config_file_path: PathBuf,
    #[serde(skip)]
    pub data_directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Hex node id; derived from the keypair hash when absent
    pub id: Option<String>,
    pub listen_addr: String,
    pub region: Option<String>,
    pub bootstrap_peers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSettings {
    pub min_peers: usize,
    pub max_peers: usize,
    pub keepalive_interval_secs: u64,
    pub keepalive_misses_before_quarantine: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSettings {
    pub route_ttl_secs: u64,
    pub route_cache_max: usize,
    pub encryption_required: bool,
    pub key_scheme: KeyScheme,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    pub initial_supply: f64,
    /// Share of the initial supply carved into the reward pool
    pub reward_pool_fraction: f64,
    pub min_stake: f64,
    pub tx_retention: usize,
    /// Genesis balances granted out of the treasury at first start
    #[serde(default)]
    pub bootstrap_balances: Vec<BootstrapBalance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapBalance {
    /// Hex node id
    pub node_id: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardSettings {
    /// Tokens per MiB forwarded
    pub reward_rate: f64,
    pub max_reward_per_day: f64,
    pub distribution_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file or fail with a pointer to --init.
    pub fn load(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(Self::default_config_path);
        let data_dir = data_dir.unwrap_or_else(Self::default_data_dir);

        if !config_path.exists() {
            anyhow::bail!(
                "Configuration file not found: {}\nRun with --init to create a new configuration",
                config_path.display()
            );
        }

        let contents =
            fs::read_to_string(&config_path).context("Failed to read configuration file")?;

        let mut config: Config =
            serde_yaml::from_str(&contents).context("Failed to parse configuration file")?;

        config.config_file_path = config_path;
        config.data_directory = data_dir;

        config.validate()?;
        Ok(config)
    }

    /// Create a new default configuration with a fresh node identity.
    pub fn create_default(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.unwrap_or_else(Self::default_config_path);
        let data_dir = data_dir.unwrap_or_else(Self::default_data_dir);

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::create_dir_all(&data_dir)?;

        networkneuron_crypto::init()
            .map_err(|e| anyhow::anyhow!("crypto init failed: {}", e))?;

        let identity = NodeIdentity::generate()
            .map_err(|e| anyhow::anyhow!("identity generation failed: {}", e))?;
        Self::save_identity(&data_dir, &identity)?;

        let config = Config {
            node: NodeConfig {
                id: Some(hex::encode(identity.node_id_bytes())),
                listen_addr: "0.0.0.0:4040".to_string(),
                region: None,
                bootstrap_peers: vec![],
            },
            peers: PeerSettings {
                min_peers: 5,
                max_peers: 50,
                keepalive_interval_secs: 15,
                keepalive_misses_before_quarantine: 1,
            },
            routing: RoutingSettings {
                route_ttl_secs: 300,
                route_cache_max: 1000,
                encryption_required: true,
                key_scheme: KeyScheme::Tunnel,
            },
            ledger: LedgerSettings {
                initial_supply: 1_000_000.0,
                reward_pool_fraction: 0.5,
                min_stake: 1_000.0,
                tx_retention: 10_000,
                bootstrap_balances: Vec::new(),
            },
            rewards: RewardSettings {
                reward_rate: 0.1,
                max_reward_per_day: 1_000.0,
                distribution_interval_secs: 86_400,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some(data_dir.join("logs").join("neuronnode.log")),
            },
            config_file_path: config_path.clone(),
            data_directory: data_dir,
        };

        let yaml = serde_yaml::to_string(&config)?;
        fs::write(&config_path, yaml)?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.peers.min_peers > self.peers.max_peers {
            anyhow::bail!(
                "min_peers ({}) exceeds max_peers ({})",
                self.peers.min_peers,
                self.peers.max_peers
            );
        }
        if !(0.0..=1.0).contains(&self.ledger.reward_pool_fraction) {
            anyhow::bail!(
                "reward_pool_fraction must be in [0, 1], got {}",
                self.ledger.reward_pool_fraction
            );
        }
        if self.routing.route_cache_max == 0 {
            anyhow::bail!("route_cache_max must be at least 1");
        }
        Ok(())
    }

    fn save_identity(data_dir: &Path, identity: &NodeIdentity) -> Result<()> {
        let key_dir = data_dir.join("keys");
        fs::create_dir_all(&key_dir)?;

        fs::write(key_dir.join("node.key"), identity.export_secret_key())?;
        fs::write(key_dir.join("node.pub"), identity.export_public_key())?;
        Ok(())
    }

    /// Load the persisted node identity, generating one on first start.
    pub fn load_identity(&self) -> Result<NodeIdentity> {
        let key_path = self.data_directory.join("keys").join("node.key");

        if key_path.exists() {
            let bytes = fs::read(&key_path).context("Failed to read node key")?;
            NodeIdentity::from_secret_key(&bytes)
                .map_err(|e| anyhow::anyhow!("invalid node key: {}", e))
        } else {
            let identity = NodeIdentity::generate()
                .map_err(|e| anyhow::anyhow!("identity generation failed: {}", e))?;
            Self::save_identity(&self.data_directory, &identity)?;
            Ok(identity)
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_file_path
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.data_directory.join("ledger")
    }

    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("neuronnode")
            .join("config.yaml")
    }

    fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("neuronnode")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_paths(tag: &str) -> (PathBuf, PathBuf) {
        let base = std::env::temp_dir().join(format!(
            "neuronnode-config-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&base);
        (base.join("config.yaml"), base.join("data"))
    }

    #[test]
    fn test_create_default_then_load() {
        let (config_path, data_dir) = temp_paths("roundtrip");

        let created =
            Config::create_default(Some(config_path.clone()), Some(data_dir.clone())).unwrap();
        assert_eq!(created.peers.min_peers, 5);
        assert_eq!(created.peers.max_peers, 50);
        assert_eq!(created.routing.route_ttl_secs, 300);
        assert_eq!(created.routing.route_cache_max, 1000);
        assert!(created.routing.encryption_required);
        assert_eq!(created.rewards.reward_rate, 0.1);
        assert_eq!(created.ledger.min_stake, 1_000.0);
        assert_eq!(created.rewards.max_reward_per_day, 1_000.0);
        assert_eq!(created.rewards.distribution_interval_secs, 86_400);
        assert_eq!(created.ledger.reward_pool_fraction, 0.5);

        let loaded = Config::load(Some(config_path), Some(data_dir.clone())).unwrap();
        assert_eq!(loaded.node.id, created.node.id);

        let _ = fs::remove_dir_all(data_dir.parent().unwrap());
    }

    #[test]
    fn test_identity_persists_across_loads() {
        let (config_path, data_dir) = temp_paths("identity");

        let config =
            Config::create_default(Some(config_path), Some(data_dir.clone())).unwrap();
        let first = config.load_identity().unwrap();
        let second = config.load_identity().unwrap();

        assert_eq!(first.node_id_bytes(), second.node_id_bytes());
        assert_eq!(
            config.node.id.as_deref().unwrap(),
            hex::encode(first.node_id_bytes())
        );

        let _ = fs::remove_dir_all(data_dir.parent().unwrap());
    }

    #[test]
    fn test_missing_config_points_to_init() {
        let (config_path, data_dir) = temp_paths("missing");

        let err = Config::load(Some(config_path), Some(data_dir)).unwrap_err();
        assert!(err.to_string().contains("--init"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let (config_path, data_dir) = temp_paths("invalid");
        let mut config =
            Config::create_default(Some(config_path.clone()), Some(data_dir.clone())).unwrap();

        config.peers.min_peers = 100;
        let yaml = serde_yaml::to_string(&config).unwrap();
        fs::write(&config_path, yaml).unwrap();

        assert!(Config::load(Some(config_path), Some(data_dir.clone())).is_err());

        let _ = fs::remove_dir_all(data_dir.parent().unwrap());
    }
}
