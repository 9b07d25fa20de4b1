//! Consensus error types.
//!
//! Two families live here. [`ConsensusError`] is returned from operations
//! that can fail for the local node (configuration, collaborators, key
//! material). [`ValidationError`] describes why an inbound message was
//! rejected; it never leaves the state machine and is only logged and
//! counted.

use ibft_types::{BlockDigest, RoundIdentifier, ValidatorId};
use thiserror::Error;

/// Errors that can occur during consensus operations.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// Not enough validators.
    #[error("not enough validators: have {have}, need {need}")]
    NotEnoughValidators {
        /// Current validator count.
        have: usize,
        /// Required validator count.
        need: usize,
    },

    /// Invalid genesis configuration.
    #[error("invalid genesis: {0}")]
    InvalidGenesis(String),

    /// Invalid engine configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The local signing key could not be used.
    #[error("signing key unavailable: {0}")]
    SigningUnavailable(String),

    /// The block builder failed to produce a block.
    #[error("block creation failed: {0}")]
    BlockCreation(String),

    /// The chain rejected a finalized block.
    #[error("chain append failed: {0}")]
    ChainAppend(String),

    /// The event queue has been closed.
    #[error("event queue closed")]
    QueueClosed,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Type conversion error.
    #[error(transparent)]
    Types(#[from] ibft_types::TypesError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConsensusError {
    /// Returns true for faults after which the engine must halt rather than
    /// keep participating.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConsensusError::SigningUnavailable(_) | ConsensusError::QueueClosed
        )
    }
}

/// A specialized Result type for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Reasons an inbound consensus message is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The signature does not verify for the claimed author.
    #[error("invalid signature from {0}")]
    InvalidSignature(ValidatorId),

    /// The author is not in the validator set of the height.
    #[error("author {0} is not a validator")]
    NotValidator(ValidatorId),

    /// The message is addressed to a different height or round.
    #[error("wrong round: expected {expected}, got {actual}")]
    WrongRound {
        /// Round of the receiving state.
        expected: RoundIdentifier,
        /// Round claimed by the message.
        actual: RoundIdentifier,
    },

    /// The proposal was not sent by the proposer of its round.
    #[error("proposal from {actual}, expected proposer {expected}")]
    WrongProposer {
        /// Computed proposer.
        expected: ValidatorId,
        /// Actual author.
        actual: ValidatorId,
    },

    /// The message digest does not match the accepted proposal.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Digest of the accepted proposal.
        expected: BlockDigest,
        /// Digest carried by the message.
        actual: BlockDigest,
    },

    /// A different proposal was already accepted for this round.
    #[error("a proposal was already accepted for this round")]
    DuplicateProposal,

    /// The proposed block is inconsistent with the chain or the payload.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// The commit seal does not verify against the digest.
    #[error("invalid commit seal from {0}")]
    InvalidCommitSeal(ValidatorId),

    /// An embedded prepared certificate is malformed.
    #[error("malformed prepared certificate: {0}")]
    MalformedPreparedCertificate(String),

    /// A proposal's round change justification is missing or malformed.
    #[error("invalid round change certificate: {0}")]
    InvalidRoundChangeCertificate(String),
}

impl ValidationError {
    /// Short, stable label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ValidationError::InvalidSignature(_) => "invalid_signature",
            ValidationError::NotValidator(_) => "not_validator",
            ValidationError::WrongRound { .. } => "wrong_round",
            ValidationError::WrongProposer { .. } => "wrong_proposer",
            ValidationError::DigestMismatch { .. } => "digest_mismatch",
            ValidationError::DuplicateProposal => "duplicate_proposal",
            ValidationError::InvalidBlock(_) => "invalid_block",
            ValidationError::InvalidCommitSeal(_) => "invalid_commit_seal",
            ValidationError::MalformedPreparedCertificate(_) => "malformed_prepared_certificate",
            ValidationError::InvalidRoundChangeCertificate(_) => "invalid_round_change_certificate",
        }
    }
}
