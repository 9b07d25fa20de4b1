//! IBFT Consensus Engine
//!
//! This crate implements Istanbul Byzantine Fault Tolerant consensus for a
//! permissioned validator set. Each height is decided by rounds of a
//! three-phase exchange (proposal, prepare, commit); a round that does not
//! finish in time is replaced through a round change.
//!
//! # Guarantees
//!
//! - **Safety**: with at most `f = (N-1)/3` faulty validators no two honest
//!   nodes finalize different blocks at the same height
//! - **Liveness**: once the network is synchronous some round completes
//! - **Finality**: an imported block carries a quorum of commit seals
//!
//! # Components
//!
//! - [`IbftProcessor`]: the event loop owning all consensus state
//! - [`statemachine`]: controller, height managers and rounds
//! - [`MessageValidator`]: checks every received message
//! - [`EventQueue`]: the bounded queue everything posts into
//! - [`RoundTimer`] / [`BlockTimer`]: timeouts delivered as events
//! - [`Genesis`]: initial validator set and engine configuration
//!
//! The node supplies the block builder ([`BlockCreator`]), the chain
//! ([`ChainAppender`]), the network ([`ValidatorMulticaster`]) and the
//! signing key ([`MessageSigner`]).
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Network    │   │    Timers    │   │ Block Builder│
//! │  (messages)  │   │  (expiries)  │   │  (blocking)  │
//! └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!        │                  │                  │
//!        └──────────────────┼──────────────────┘
//!                           ▼
//!                   ┌──────────────┐
//!                   │  EventQueue  │
//!                   └──────┬───────┘
//!                          ▼
//!                   ┌──────────────┐     ┌──────────────┐
//!                   │IbftProcessor │────▶│IbftController│
//!                   └──────────────┘     └──────┬───────┘
//!                                               ▼
//!                   ┌──────────────┐     ┌──────────────┐
//!                   │   IbftRound  │◀────│HeightManager │
//!                   └──────┬───────┘     └──────────────┘
//!                          │ commit quorum
//!                          ▼
//!                   ┌──────────────┐
//!                   │ ChainAppender│
//!                   └──────────────┘
//! ```

mod block_creation;
mod collaborators;
mod config;
mod error;
mod event_queue;
mod events;
mod future_buffer;
mod genesis;
mod gossip;
mod liveness;
mod message;
mod message_factory;
mod message_tracker;
mod metrics;
mod processor;
pub mod statemachine;
mod timers;
mod validation;
mod validator;

pub use block_creation::BlockCreationService;
pub use collaborators::{
    BlockCreator, ChainAppender, MessageSigner, StaticValidatorProvider, ValidatorMulticaster,
    ValidatorProvider,
};
pub use config::IbftConfig;
pub use error::{ConsensusError, Result, ValidationError};
pub use event_queue::{EventQueue, EventReceiver};
pub use events::ConsensusEvent;
pub use future_buffer::{BufferedMessage, FutureMessageBuffer};
pub use genesis::{generate_devnet_genesis, Genesis, GenesisValidator};
pub use gossip::{Gossiper, UniqueMessageMulticaster};
pub use liveness::StallMonitor;
pub use message::{
    best_prepared_certificate, Commit, CommitPayload, ConsensusMessage, MessageId, Payload,
    Prepare, PreparePayload, PreparedCertificate, Proposal, ProposalPayload, RoundChange,
    RoundChangeCertificate, RoundChangePayload, SignedPayload,
};
pub use message_factory::MessageFactory;
pub use message_tracker::MessageTracker;
pub use metrics::{ConsensusMetrics, MessageLabels, RejectLabels};
pub use processor::IbftProcessor;
pub use timers::{round_timeout, BlockTimer, RoundTimer};
pub use validation::MessageValidator;
pub use validator::{fault_tolerance, quorum_size, ValidatorSet};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let _: IbftConfig = IbftConfig::default();
        let _: Option<MessageId> = None;
        assert_eq!(quorum_size(4), 3);
    }
}
