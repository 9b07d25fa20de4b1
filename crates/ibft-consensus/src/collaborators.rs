//! Interfaces to the rest of the node.
//!
//! The state machine never builds block bodies, stores blocks or talks to
//! peers itself; it reaches those concerns through the traits below.

use crate::error::Result;
use crate::validator::ValidatorSet;
use bytes::Bytes;
use ibft_types::{Block, BlockHeader, FinalizedBlock, NodeKey, RoundIdentifier, Signature, ValidatorId};

/// Builds candidate blocks on request.
///
/// Called from the blocking thread pool, never from the processor task.
pub trait BlockCreator: Send + Sync + 'static {
    /// Creates a block on top of `parent` for `round`.
    fn create_block(&self, parent: &BlockHeader, round: RoundIdentifier) -> Result<Block>;
}

/// Appends finalized blocks to the local chain.
pub trait ChainAppender: Send + Sync {
    /// Imports a block together with its commit seals.
    fn append_block(&self, block: &FinalizedBlock) -> Result<()>;
}

/// Sends encoded consensus messages to the other validators.
pub trait ValidatorMulticaster: Send + Sync {
    /// Sends `data` to every validator except the local node and those in `denylist`.
    fn send(&self, data: Bytes, denylist: &[ValidatorId]);
}

/// Source of validator sets.
pub trait ValidatorProvider: Send + Sync {
    /// Returns the validators responsible for deciding `height`.
    fn validators_for_height(&self, height: u64) -> ValidatorSet;
}

/// Local signing key.
pub trait MessageSigner: Send + Sync {
    /// Identity of the local node.
    fn id(&self) -> ValidatorId;

    /// Signs `data`. An error means the key material is unusable.
    fn sign(&self, data: &[u8]) -> Result<Signature>;
}

impl MessageSigner for NodeKey {
    fn id(&self) -> ValidatorId {
        NodeKey::id(self)
    }

    fn sign(&self, data: &[u8]) -> Result<Signature> {
        Ok(NodeKey::sign(self, data))
    }
}

/// A validator set that never changes.
#[derive(Debug, Clone)]
pub struct StaticValidatorProvider {
    validators: ValidatorSet,
}

impl StaticValidatorProvider {
    /// Creates a provider returning `validators` for every height.
    pub fn new(validators: ValidatorSet) -> Self {
        Self { validators }
    }
}

impl ValidatorProvider for StaticValidatorProvider {
    fn validators_for_height(&self, _height: u64) -> ValidatorSet {
        self.validators.clone()
    }
}
