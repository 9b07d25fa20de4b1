//! Node-lifetime state shared by every height.

use crate::block_creation::BlockCreationService;
use crate::collaborators::{
    BlockCreator, ChainAppender, MessageSigner, ValidatorMulticaster, ValidatorProvider,
};
use crate::config::IbftConfig;
use crate::error::ValidationError;
use crate::event_queue::EventQueue;
use crate::gossip::{Gossiper, UniqueMessageMulticaster};
use crate::message::ConsensusMessage;
use crate::message_factory::MessageFactory;
use crate::metrics::ConsensusMetrics;
use crate::timers::{BlockTimer, RoundTimer};
use ibft_types::ValidatorId;
use std::sync::Arc;
use tracing::debug;

/// Collaborators, timers and outbound messaging owned by the controller and
/// lent to the height manager and its rounds.
pub struct FinalState {
    /// Engine configuration.
    pub config: IbftConfig,
    /// Signs local messages.
    pub factory: MessageFactory,
    /// Outbound messages.
    pub gossiper: Gossiper,
    /// Round timer.
    pub round_timer: RoundTimer,
    /// Block period timer.
    pub block_timer: BlockTimer,
    /// Block builder front end.
    pub block_creation: BlockCreationService,
    /// Chain import.
    pub chain: Arc<dyn ChainAppender>,
    /// Validator sets per height.
    pub validator_provider: Arc<dyn ValidatorProvider>,
    /// Metrics.
    pub metrics: ConsensusMetrics,
}

impl FinalState {
    /// Wires the state from its collaborators. Timers and the block builder
    /// post into `queue`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: IbftConfig,
        signer: Arc<dyn MessageSigner>,
        multicaster: Arc<dyn ValidatorMulticaster>,
        block_creator: Arc<dyn BlockCreator>,
        chain: Arc<dyn ChainAppender>,
        validator_provider: Arc<dyn ValidatorProvider>,
        queue: EventQueue,
        metrics: ConsensusMetrics,
    ) -> Self {
        let gossiper = Gossiper::new(UniqueMessageMulticaster::new(
            multicaster,
            config.gossiped_history_limit,
        ));
        Self {
            factory: MessageFactory::new(signer),
            gossiper,
            round_timer: RoundTimer::new(queue.clone(), config.request_timeout()),
            block_timer: BlockTimer::new(queue.clone(), config.block_period()),
            block_creation: BlockCreationService::new(block_creator, queue),
            chain,
            validator_provider,
            metrics,
            config,
        }
    }

    /// Identity of the local node.
    pub fn local_id(&self) -> ValidatorId {
        self.factory.local_id()
    }

    /// Broadcasts a locally created message.
    pub fn broadcast(&mut self, message: &ConsensusMessage) {
        self.gossiper.broadcast(message);
    }

    /// Logs and counts a rejected message.
    pub fn reject(&self, kind: &str, error: &ValidationError) {
        debug!(kind, reason = error.label(), %error, "message rejected");
        self.metrics.record_rejected(kind, error.label());
    }
}
