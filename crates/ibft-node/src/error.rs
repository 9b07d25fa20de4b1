//! Node error types.

use ibft_types::ValidatorId;
use thiserror::Error;

/// Errors raised while configuring or running a node.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Consensus engine error.
    #[error(transparent)]
    Consensus(#[from] ibft_consensus::ConsensusError),

    /// Key material could not be decoded.
    #[error("invalid key: {0}")]
    Key(#[from] ibft_types::TypesError),

    /// The local key is not one of the genesis validators.
    #[error("validator {0} is not in the genesis validator set")]
    NotInGenesis(ValidatorId),

    /// No node with the given identity is running.
    #[error("unknown node {0}")]
    UnknownNode(ValidatorId),

    /// The processor task panicked or was aborted.
    #[error("processor task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A wait did not complete in time.
    #[error("timed out waiting for height {height}")]
    Timeout {
        /// Height that was awaited.
        height: u64,
    },
}

/// A specialized Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
