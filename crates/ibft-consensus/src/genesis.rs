//! Genesis configuration for an IBFT network.
//!
//! The genesis file defines the genesis block timestamp, the initial
//! validator set and the engine parameters shared by every node.

use crate::config::IbftConfig;
use crate::error::{ConsensusError, Result};
use crate::validator::ValidatorSet;
use ibft_types::{Block, NodeKey, ValidatorId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Genesis entry for a validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    /// Human-readable name.
    pub name: String,

    /// Public key (hex-encoded).
    pub pubkey: String,
}

impl GenesisValidator {
    /// Parses the validator identity.
    pub fn validator_id(&self) -> Result<ValidatorId> {
        ValidatorId::from_hex(&self.pubkey).map_err(|e| {
            ConsensusError::InvalidGenesis(format!("validator {}: {}", self.name, e))
        })
    }
}

/// Complete genesis configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    /// Network identifier.
    pub chain_id: String,

    /// Genesis block timestamp (unix seconds).
    pub timestamp: u64,

    /// Initial validators.
    pub validators: Vec<GenesisValidator>,

    /// Engine parameters.
    #[serde(default)]
    pub ibft: IbftConfig,
}

impl Genesis {
    /// Creates an empty genesis configuration.
    pub fn new(chain_id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            chain_id: chain_id.into(),
            timestamp,
            validators: Vec::new(),
            ibft: IbftConfig::default(),
        }
    }

    /// Adds a validator.
    pub fn with_validator(mut self, validator: GenesisValidator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Sets the engine parameters.
    pub fn with_config(mut self, config: IbftConfig) -> Self {
        self.ibft = config;
        self
    }

    /// Loads genesis from a JSON file.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConsensusError::InvalidGenesis(format!("failed to read file: {}", e)))?;

        let genesis: Genesis = serde_json::from_str(&content)?;
        genesis.validate()?;
        Ok(genesis)
    }

    /// Loads genesis from a YAML file.
    pub fn load_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConsensusError::InvalidGenesis(format!("failed to read file: {}", e)))?;

        let genesis: Genesis = serde_yaml::from_str(&content)
            .map_err(|e| ConsensusError::InvalidGenesis(e.to_string()))?;
        genesis.validate()?;
        Ok(genesis)
    }

    /// Loads genesis, picking the format from the file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::load_yaml(path),
            _ => Self::load_json(path),
        }
    }

    /// Validates the genesis configuration.
    pub fn validate(&self) -> Result<()> {
        if self.chain_id.is_empty() {
            return Err(ConsensusError::InvalidGenesis("chain_id is empty".into()));
        }

        if self.validators.is_empty() {
            return Err(ConsensusError::InvalidGenesis("no validators".into()));
        }

        let mut seen_names = HashSet::new();
        let mut seen_ids = HashSet::new();

        for v in &self.validators {
            let id = v.validator_id()?;
            if !seen_names.insert(&v.name) {
                return Err(ConsensusError::InvalidGenesis(format!(
                    "duplicate validator name: {}",
                    v.name
                )));
            }
            if !seen_ids.insert(id) {
                return Err(ConsensusError::InvalidGenesis(format!(
                    "duplicate validator pubkey: {}",
                    v.pubkey
                )));
            }
        }

        self.ibft
            .validate()
            .map_err(|e| ConsensusError::InvalidGenesis(e.to_string()))
    }

    /// Returns the genesis block.
    pub fn block(&self) -> Block {
        Block::genesis(self.timestamp)
    }

    /// Returns the initial validator set.
    pub fn validator_set(&self) -> Result<ValidatorSet> {
        let ids = self
            .validators
            .iter()
            .map(GenesisValidator::validator_id)
            .collect::<Result<Vec<_>>>()?;
        Ok(ValidatorSet::new(ids))
    }

    /// Saves genesis to a JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| ConsensusError::InvalidGenesis(format!("failed to write file: {}", e)))?;

        Ok(())
    }

    /// Saves genesis to a YAML file.
    pub fn save_yaml(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConsensusError::InvalidGenesis(e.to_string()))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| ConsensusError::InvalidGenesis(format!("failed to write file: {}", e)))?;

        Ok(())
    }
}

/// Generates a devnet genesis whose validator `i` has key `NodeKey::from_seed(i)`.
pub fn generate_devnet_genesis(validator_count: usize, timestamp: u64) -> Genesis {
    let validators = (0..validator_count as u64)
        .map(|i| GenesisValidator {
            name: format!("validator-{}", i + 1),
            pubkey: NodeKey::from_seed(i).id().to_hex(),
        })
        .collect();

    Genesis {
        chain_id: "ibft-devnet".into(),
        timestamp,
        validators,
        ibft: IbftConfig::default(),
    }
}
