//! Configuration management for meshchain

use crate::consensus::{ChainParams, ConsensusRule, MAX_HASH_PREFIX_DIFFICULTY};
use crate::error::{ChainError, Result};
use crate::miner::MinerSettings;
use crate::propagation::PropagationConfig;
use crate::transaction::{Amount, SYSTEM_SENDER};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// File looked up in the working directory by `load_config`.
pub const CONFIG_FILE: &str = "meshchain.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub consensus: ChainParams,
    #[serde(default)]
    pub mempool: MempoolConfig,
    #[serde(default)]
    pub miner: MinerConfig,
    #[serde(default)]
    pub propagation: PropagationConfig,
    #[serde(default)]
    pub genesis: GenesisConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_nodes")]
    pub nodes: usize,
    /// Ids of nodes that forge blocks.
    #[serde(default)]
    pub malicious: Vec<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            nodes: default_nodes(),
            malicious: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MempoolConfig {
    #[serde(default = "default_mempool_capacity")]
    pub capacity: usize,
    /// Transactions per block; mining starts once this many are pending.
    #[serde(default = "default_block_capacity")]
    pub block_capacity: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_mempool_capacity(),
            block_capacity: default_block_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinerConfig {
    #[serde(default = "default_reward")]
    pub reward: f64,
    /// Mine partial blocks every `poll_interval_ms` instead of waiting for a full one.
    #[serde(default)]
    pub always_on: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Chance that a malicious node forges a given draft.
    #[serde(default = "default_forge_rate")]
    pub forge_rate: f64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            reward: default_reward(),
            always_on: false,
            poll_interval_ms: default_poll_interval_ms(),
            forge_rate: default_forge_rate(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenesisAccount {
    pub id: String,
    pub balance: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenesisConfig {
    #[serde(default = "default_genesis_accounts")]
    pub accounts: Vec<GenesisAccount>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            accounts: default_genesis_accounts(),
        }
    }
}

fn default_nodes() -> usize {
    3
}

fn default_mempool_capacity() -> usize {
    64
}

fn default_block_capacity() -> usize {
    2
}

fn default_reward() -> f64 {
    10.0
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_forge_rate() -> f64 {
    0.5
}

fn default_genesis_accounts() -> Vec<GenesisAccount> {
    ["alice", "bob", "carol"]
        .iter()
        .map(|id| GenesisAccount {
            id: id.to_string(),
            balance: 100.0,
        })
        .collect()
}

fn to_amount(value: f64, what: &str) -> Result<Amount> {
    if !value.is_finite() || value < 0.0 {
        return Err(ChainError::Config(format!("{what} must be a non-negative number")));
    }
    Amount::checked_from_num(value)
        .ok_or_else(|| ChainError::Config(format!("{what} is out of range")))
}

impl Config {
    /// Check the values the engine cannot run without.
    pub fn validate(&self) -> Result<()> {
        if self.network.nodes == 0 {
            return Err(ChainError::Config("network.nodes must be at least 1".into()));
        }
        if let Some(id) = self.network.malicious.iter().find(|id| **id >= self.network.nodes) {
            return Err(ChainError::Config(format!(
                "network.malicious contains {id}, but only {} nodes are configured",
                self.network.nodes
            )));
        }
        if self.mempool.capacity == 0 || self.mempool.block_capacity == 0 {
            return Err(ChainError::Config(
                "mempool.capacity and mempool.block_capacity must be at least 1".into(),
            ));
        }
        if self.mempool.block_capacity > self.mempool.capacity {
            return Err(ChainError::Config(
                "mempool.block_capacity cannot exceed mempool.capacity".into(),
            ));
        }
        if self.consensus.rule == ConsensusRule::HashPrefix
            && self.consensus.difficulty > MAX_HASH_PREFIX_DIFFICULTY
        {
            return Err(ChainError::Config(format!(
                "consensus.difficulty cannot exceed {MAX_HASH_PREFIX_DIFFICULTY} for the hash-prefix rule"
            )));
        }
        if !(0.0..=1.0).contains(&self.propagation.loss_rate) {
            return Err(ChainError::Config("propagation.loss_rate must be within [0, 1]".into()));
        }
        if self.propagation.min_delay_ms > self.propagation.max_delay_ms {
            return Err(ChainError::Config(
                "propagation.min_delay_ms cannot exceed propagation.max_delay_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.miner.forge_rate) {
            return Err(ChainError::Config("miner.forge_rate must be within [0, 1]".into()));
        }
        if self.miner.always_on && self.miner.poll_interval_ms == 0 {
            return Err(ChainError::Config("miner.poll_interval_ms must be positive".into()));
        }
        to_amount(self.miner.reward, "miner.reward")?;

        if self.genesis.accounts.is_empty() {
            return Err(ChainError::Config("genesis.accounts must not be empty".into()));
        }
        for account in &self.genesis.accounts {
            if account.id.is_empty() || account.id == SYSTEM_SENDER {
                return Err(ChainError::Config(format!(
                    "genesis account id {:?} is not allowed",
                    account.id
                )));
            }
            to_amount(account.balance, &format!("genesis balance of {}", account.id))?;
        }
        Ok(())
    }

    pub fn chain_params(&self) -> ChainParams {
        self.consensus
    }

    pub fn miner_settings(&self) -> Result<MinerSettings> {
        Ok(MinerSettings {
            reward: to_amount(self.miner.reward, "miner.reward")?,
            block_capacity: self.mempool.block_capacity,
            poll: self
                .miner
                .always_on
                .then(|| Duration::from_millis(self.miner.poll_interval_ms)),
        })
    }

    /// Genesis allocations in configuration order.
    pub fn genesis_allocations(&self) -> Result<Vec<(String, Amount)>> {
        self.genesis
            .accounts
            .iter()
            .map(|account| {
                let balance = to_amount(account.balance, &format!("genesis balance of {}", account.id))?;
                Ok((account.id.clone(), balance))
            })
            .collect()
    }
}

/// Load `meshchain.toml` from the working directory, or defaults when it is absent.
pub fn load_config() -> Result<Config> {
    let path = Path::new(CONFIG_FILE);
    if !path.exists() {
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }
    load_config_from(path)
}

pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config> {
    let config_str = fs::read_to_string(path.as_ref())?;
    let config: Config = toml::from_str(&config_str)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::core::chain::Commitment;
    use crate::digest::HashAlgorithm;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.nodes, 3);
        assert_eq!(config.consensus, ChainParams::default());
        assert_eq!(config.consensus.difficulty, 2);
        assert_eq!(config.mempool.block_capacity, 2);
        assert_eq!(config.mempool.capacity, 64);
        assert_eq!(config.propagation, PropagationConfig::default());

        let allocations = config.genesis_allocations().unwrap();
        assert_eq!(allocations.len(), 3);
        assert_eq!(allocations[0], ("alice".to_string(), Amount::from_num(100)));

        let settings = config.miner_settings().unwrap();
        assert_eq!(settings.reward, Amount::from_num(10));
        assert_eq!(settings.poll, None);
    }

    #[test]
    fn test_load_full_file() {
        let file = write_config(
            r#"
[network]
nodes = 5
malicious = [4]

[consensus]
hash = "djb2"
commitment = "flat"
rule = "numeric"
difficulty = 7

[mempool]
capacity = 10
block_capacity = 3

[miner]
reward = 2.5
always_on = true
poll_interval_ms = 20

[propagation]
min_delay_ms = 1
max_delay_ms = 2
loss_rate = 0.25

[[genesis.accounts]]
id = "dave"
balance = 40

[[genesis.accounts]]
id = "erin"
balance = 60.5
"#,
        );

        let config = load_config_from(file.path()).unwrap();
        assert_eq!(config.network.nodes, 5);
        assert_eq!(config.network.malicious, vec![4]);
        assert_eq!(
            config.chain_params(),
            ChainParams {
                hash: HashAlgorithm::Djb2,
                commitment: Commitment::Flat,
                rule: ConsensusRule::Numeric,
                difficulty: 7,
            }
        );
        assert_eq!(config.propagation.loss_rate, 0.25);

        let settings = config.miner_settings().unwrap();
        assert_eq!(settings.reward, Amount::from_num(2.5));
        assert_eq!(settings.block_capacity, 3);
        assert_eq!(settings.poll, Some(Duration::from_millis(20)));

        let allocations = config.genesis_allocations().unwrap();
        assert_eq!(allocations[1], ("erin".to_string(), Amount::from_num(60.5)));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let file = write_config("[consensus]\ndifficulty = 1\n");
        let config = load_config_from(file.path()).unwrap();
        assert_eq!(config.consensus.difficulty, 1);
        assert_eq!(config.consensus.hash, HashAlgorithm::Sha256);
        assert_eq!(config.network.nodes, 3);
        assert_eq!(config.genesis.accounts.len(), 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for contents in [
            "[network]\nnodes = 0\n",
            "[network]\nnodes = 2\nmalicious = [2]\n",
            "[mempool]\ncapacity = 1\nblock_capacity = 2\n",
            "[propagation]\nloss_rate = 1.5\n",
            "[propagation]\nmin_delay_ms = 9\nmax_delay_ms = 1\n",
            "[miner]\nreward = -1\n",
            "[consensus]\ndifficulty = 9\n",
            "[genesis]\naccounts = []\n",
            "[[genesis.accounts]]\nid = \"SYSTEM\"\nbalance = 1\n",
        ] {
            let file = write_config(contents);
            assert!(
                matches!(load_config_from(file.path()), Err(ChainError::Config(_))),
                "accepted: {contents}"
            );
        }
    }

    #[test]
    fn test_difficulty_cap_applies_to_hash_prefix_only() {
        let mut config = Config::default();
        config.consensus.difficulty = MAX_HASH_PREFIX_DIFFICULTY;
        assert!(config.validate().is_ok());

        config.consensus.difficulty = MAX_HASH_PREFIX_DIFFICULTY + 1;
        assert!(matches!(config.validate(), Err(ChainError::Config(_))));

        config.consensus.rule = ConsensusRule::Numeric;
        config.consensus.difficulty = 1_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let file = write_config("[network\nnodes = ");
        assert!(matches!(load_config_from(file.path()), Err(ChainError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config_from(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ChainError::Io(_))));
    }
}
