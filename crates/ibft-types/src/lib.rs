//! Common types used throughout the IBFT consensus engine.
//!
//! This crate provides the value types shared by the consensus state
//! machine and the node: round identifiers, validator identities and
//! signatures, and the block structures that consensus agrees on.

mod block;
mod error;
mod identity;
mod round;

pub use block::{Block, BlockDigest, BlockHeader, FinalizedBlock};
pub use error::{Result, TypesError};
pub use identity::{NodeKey, Signature, ValidatorId};
pub use round::RoundIdentifier;

/// The unique namespace prefix used in all signing operations to prevent signature replay attacks.
pub const NAMESPACE: &[u8] = b"_IBFT";
