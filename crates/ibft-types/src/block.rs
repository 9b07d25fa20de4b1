//! Block structures agreed on by consensus.
//!
//! The block body is opaque to consensus; only the header digest is voted
//! on. The round is deliberately not part of the header so that a block
//! carried over by a round change keeps its digest.

use crate::identity::{Signature, ValidatorId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A block digest (SHA-256 hash of the block header).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockDigest([u8; 32]);

impl BlockDigest {
    /// The parent digest of the genesis block (all zeros).
    pub const GENESIS_PARENT: Self = Self([0u8; 32]);

    /// Creates a digest from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Creates a digest from a hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_str, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Returns the data a validator signs to produce its commit seal.
    pub fn commit_seal_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(12 + 32);
        data.extend_from_slice(b"COMMIT_SEAL:");
        data.extend_from_slice(&self.0);
        data
    }
}

impl Default for BlockDigest {
    fn default() -> Self {
        Self::GENESIS_PARENT
    }
}

impl std::fmt::Display for BlockDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for BlockDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlockDigest({})", &self.to_hex()[..12])
    }
}

/// A block header containing metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block number (0 = genesis).
    pub number: u64,

    /// Parent block digest.
    pub parent: BlockDigest,

    /// Validator that built the block.
    pub proposer: ValidatorId,

    /// Timestamp (unix seconds).
    pub timestamp: u64,

    /// SHA-256 of the block body.
    pub body_root: [u8; 32],
}

impl BlockHeader {
    /// Computes the block digest from the header.
    pub fn digest(&self) -> BlockDigest {
        let bytes = serde_json::to_vec(self).expect("header serialization should not fail");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        BlockDigest(hasher.finalize().into())
    }
}

/// A full block: header plus opaque body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    /// Block header.
    pub header: BlockHeader,

    /// Opaque body produced by the block builder.
    pub body: Vec<u8>,
}

impl Block {
    /// Creates a new block.
    pub fn new(
        number: u64,
        parent: BlockDigest,
        proposer: ValidatorId,
        timestamp: u64,
        body: Vec<u8>,
    ) -> Self {
        let header = BlockHeader {
            number,
            parent,
            proposer,
            timestamp,
            body_root: Self::compute_body_root(&body),
        };
        Self { header, body }
    }

    /// Creates the genesis block.
    pub fn genesis(timestamp: u64) -> Self {
        Self::new(
            0,
            BlockDigest::GENESIS_PARENT,
            ValidatorId::from_bytes([0u8; 32]),
            timestamp,
            Vec::new(),
        )
    }

    /// Returns the block digest.
    pub fn digest(&self) -> BlockDigest {
        self.header.digest()
    }

    /// Returns the block number.
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Returns the parent digest.
    pub fn parent(&self) -> BlockDigest {
        self.header.parent
    }

    fn compute_body_root(body: &[u8]) -> [u8; 32] {
        Sha256::digest(body).into()
    }

    /// Verifies the body root matches the body.
    pub fn verify_body_root(&self) -> bool {
        Self::compute_body_root(&self.body) == self.header.body_root
    }
}

/// A block together with the commit seals that finalized it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinalizedBlock {
    /// The block.
    pub block: Block,

    /// Round in which the block was committed.
    pub round: u32,

    /// Commit seals (validator, signature over the block digest).
    pub commit_seals: Vec<(ValidatorId, Signature)>,
}

impl FinalizedBlock {
    /// Creates a new finalized block.
    pub fn new(block: Block, round: u32, commit_seals: Vec<(ValidatorId, Signature)>) -> Self {
        Self {
            block,
            round,
            commit_seals,
        }
    }

    /// Returns the block digest.
    pub fn digest(&self) -> BlockDigest {
        self.block.digest()
    }

    /// Returns the block number.
    pub fn number(&self) -> u64 {
        self.block.number()
    }

    /// Returns the number of commit seals.
    pub fn seal_count(&self) -> usize {
        self.commit_seals.len()
    }

    /// Returns the validators whose seals verify against the block digest.
    pub fn valid_sealers(&self) -> Vec<ValidatorId> {
        let data = self.digest().commit_seal_data();
        self.commit_seals
            .iter()
            .filter(|(id, seal)| id.verify(&data, seal))
            .map(|(id, _)| *id)
            .collect()
    }
}
