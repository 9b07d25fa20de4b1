//! Events consumed by the processor.

use bytes::Bytes;
use ibft_types::{Block, BlockHeader, RoundIdentifier, ValidatorId};

/// An input to the consensus state machine.
#[derive(Debug, Clone)]
pub enum ConsensusEvent {
    /// Encoded message received from a peer.
    MessageReceived {
        /// Peer that delivered the message (not necessarily its author).
        sender: ValidatorId,
        /// Encoded [`crate::ConsensusMessage`].
        data: Bytes,
    },
    /// The block period for the round 0 proposer has elapsed.
    BlockTimerExpiry(RoundIdentifier),
    /// The round timer fired.
    RoundExpiry(RoundIdentifier),
    /// The block builder finished a block for a round.
    BlockCreated {
        /// Round the block was requested for.
        round: RoundIdentifier,
        /// The new block.
        block: Block,
    },
    /// A block was imported into the local chain.
    NewChainHead(BlockHeader),
}

impl ConsensusEvent {
    /// Returns the event type as a string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusEvent::MessageReceived { .. } => "message_received",
            ConsensusEvent::BlockTimerExpiry(_) => "block_timer_expiry",
            ConsensusEvent::RoundExpiry(_) => "round_expiry",
            ConsensusEvent::BlockCreated { .. } => "block_created",
            ConsensusEvent::NewChainHead(_) => "new_chain_head",
        }
    }
}
