//! Node configuration.
//!
//! Values are layered: built-in defaults, then an optional configuration
//! file (YAML, JSON or TOML, by extension), then `IBFT_*` environment
//! variables. Nested engine values use a double underscore, for example
//! `IBFT_CONSENSUS__REQUEST_TIMEOUT_SECONDS=2`.

use crate::error::Result;
use config::{Config, Environment, File};
use ibft_consensus::{generate_devnet_genesis, Genesis, IbftConfig};
use ibft_types::NodeKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Configuration for an IBFT node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Ed25519 private key of the local validator (hex encoded).
    pub private_key: Option<String>,
    /// Deterministic devnet key seed, used when no private key is set.
    pub seed: Option<u64>,
    /// Genesis file. A devnet genesis is generated when unset.
    pub genesis: Option<PathBuf>,
    /// Number of validators in a generated devnet genesis.
    pub validators: usize,
    /// Engine parameters for a generated genesis.
    pub consensus: IbftConfig,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format (pretty or json).
    pub log_format: String,
    /// Stop once every node reached this height.
    pub max_height: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            private_key: None,
            seed: None,
            genesis: None,
            validators: 4,
            consensus: IbftConfig::default(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            max_height: None,
        }
    }
}

impl NodeConfig {
    /// Loads the configuration from `path` (if any) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("IBFT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// The local signing key, if one is configured.
    pub fn node_key(&self) -> Result<Option<NodeKey>> {
        match (&self.private_key, self.seed) {
            (Some(hex), _) => Ok(Some(NodeKey::from_hex(hex)?)),
            (None, Some(seed)) => Ok(Some(NodeKey::from_seed(seed))),
            (None, None) => Ok(None),
        }
    }

    /// Loads the genesis file, or generates a devnet genesis starting now.
    pub fn genesis(&self) -> Result<Genesis> {
        let genesis = match &self.genesis {
            Some(path) => Genesis::load(path)?,
            None => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default();
                let genesis = generate_devnet_genesis(self.validators, now)
                    .with_config(self.consensus.clone());
                genesis.validate()?;
                genesis
            }
        };
        Ok(genesis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.validators, 4);
        assert!(config.node_key().unwrap().is_none());
        assert_eq!(config.genesis().unwrap().validators.len(), 4);
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "seed: 2\nvalidators: 7\nmax_height: 12\nconsensus:\n  request_timeout_seconds: 9"
        )
        .unwrap();

        let config = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.seed, Some(2));
        assert_eq!(config.validators, 7);
        assert_eq!(config.max_height, Some(12));
        assert_eq!(config.consensus.request_timeout_seconds, 9);
        // Unset engine values keep their defaults.
        assert_eq!(config.consensus.future_messages_max_distance, 10);
        assert_eq!(
            config.node_key().unwrap().map(|k| k.id()),
            Some(NodeKey::from_seed(2).id())
        );
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("IBFT_CONSENSUS__DUPLICATE_MESSAGE_LIMIT", "33");
        let config = NodeConfig::load(None);
        std::env::remove_var("IBFT_CONSENSUS__DUPLICATE_MESSAGE_LIMIT");

        assert_eq!(config.unwrap().consensus.duplicate_message_limit, 33);
    }

    #[test]
    fn test_genesis_file_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genesis.json");
        generate_devnet_genesis(5, 42).save_json(&path).unwrap();

        let config = NodeConfig {
            genesis: Some(path),
            ..NodeConfig::default()
        };
        let genesis = config.genesis().unwrap();
        assert_eq!(genesis.timestamp, 42);
        assert_eq!(genesis.validators.len(), 5);
    }
}
