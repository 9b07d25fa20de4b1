//! Routes events to the height manager of the current height.

use super::final_state::FinalState;
use super::height_manager::{
    ActiveHeightManager, BlockHeightManager, HeightManager, InactiveHeightManager,
};
use crate::error::{Result, ValidationError};
use crate::events::ConsensusEvent;
use crate::future_buffer::FutureMessageBuffer;
use crate::message::ConsensusMessage;
use crate::message_tracker::MessageTracker;
use crate::validator::ValidatorSet;
use bytes::Bytes;
use ibft_types::{BlockHeader, RoundIdentifier, ValidatorId};
use tracing::{debug, info, trace};

/// Owns the current height manager and replaces it as the chain grows.
pub struct IbftController {
    final_state: FinalState,
    current: HeightManager,
    validators: ValidatorSet,
    future_messages: FutureMessageBuffer,
    tracker: MessageTracker,
}

impl IbftController {
    /// Creates a controller on top of `chain_head`. Nothing happens until
    /// [`IbftController::start`].
    pub fn new(final_state: FinalState, chain_head: BlockHeader) -> Self {
        let height = chain_head.number + 1;
        let validators = final_state
            .validator_provider
            .validators_for_height(height);
        let future_messages = FutureMessageBuffer::new(
            final_state.config.future_messages_max_distance,
            final_state.config.future_messages_limit,
            height,
        );
        let tracker = MessageTracker::new(final_state.config.duplicate_message_limit);
        Self {
            current: HeightManager::Inactive(InactiveHeightManager::new(chain_head)),
            final_state,
            validators,
            future_messages,
            tracker,
        }
    }

    /// Starts consensus for the height after the chain head.
    pub fn start(&mut self) -> Result<()> {
        let head = self.current.parent_header().clone();
        self.start_new_height(head)
    }

    /// Height being decided.
    pub fn chain_height(&self) -> u64 {
        self.current.chain_height()
    }

    /// Active round, if the local node validates the current height.
    pub fn current_round(&self) -> Option<RoundIdentifier> {
        self.current.current_round()
    }

    /// The current height manager.
    pub fn height_manager(&self) -> &HeightManager {
        &self.current
    }

    /// Shared state.
    pub fn final_state(&self) -> &FinalState {
        &self.final_state
    }

    /// Handles one event.
    pub fn handle_event(&mut self, event: ConsensusEvent) -> Result<()> {
        match event {
            ConsensusEvent::MessageReceived { sender, data } => self.handle_message(sender, data)?,
            ConsensusEvent::NewChainHead(header) => self.handle_new_chain_head(header)?,
            ConsensusEvent::BlockTimerExpiry(round) => {
                if self.is_current(&round) {
                    self.current
                        .handle_block_timer_expiry(&mut self.final_state, round)?;
                }
            }
            ConsensusEvent::RoundExpiry(round) => {
                if self.is_current(&round) {
                    self.current
                        .handle_round_expiry(&mut self.final_state, round)?;
                }
            }
            ConsensusEvent::BlockCreated { round, block } => {
                if self.is_current(&round) {
                    self.current
                        .handle_block_created(&mut self.final_state, round, block)?;
                }
            }
        }
        self.advance_if_finalized()
    }

    fn is_current(&self, round: &RoundIdentifier) -> bool {
        if round.sequence == self.chain_height() {
            return true;
        }
        trace!(%round, height = self.chain_height(), "ignoring event for another height");
        false
    }

    fn handle_message(&mut self, sender: ValidatorId, data: Bytes) -> Result<()> {
        let message = match ConsensusMessage::decode(&data) {
            Ok(message) => message,
            Err(e) => {
                debug!(%sender, error = %e, "dropping undecodable message");
                self.final_state
                    .metrics
                    .record_rejected("unknown", "malformed");
                return Ok(());
            }
        };

        let id = message.id();
        if self.tracker.has_seen(&id) {
            trace!(kind = message.kind(), "duplicate message");
            return Ok(());
        }

        let height = message.round().sequence;
        let current = self.chain_height();
        if height == current {
            self.tracker.add_seen(id);
            self.handle_current_height_message(sender, message)
        } else if height > current {
            self.buffer_future_message(sender, message);
            Ok(())
        } else {
            trace!(height, current, "dropping message for finished height");
            Ok(())
        }
    }

    /// Stores a message for a later height once its author is known to be a
    /// validator of that height.
    fn buffer_future_message(&mut self, sender: ValidatorId, message: ConsensusMessage) {
        let height = message.round().sequence;
        if !self.future_messages.accepts(height) {
            debug!(height, current = self.chain_height(), "dropping message too far ahead");
            return;
        }
        let author = message.author();
        if !message.verify_signature() {
            self.final_state
                .reject(message.kind(), &ValidationError::InvalidSignature(author));
            return;
        }
        let validators = self
            .final_state
            .validator_provider
            .validators_for_height(height);
        if !validators.contains(&author) {
            self.final_state
                .reject(message.kind(), &ValidationError::NotValidator(author));
            return;
        }

        let id = message.id();
        self.tracker.add_seen(id);
        let Some(evicted) = self.future_messages.add(height, sender, message) else {
            return;
        };
        // Evicted messages may be delivered again later.
        for dropped in evicted {
            self.tracker.forget(&dropped.message.id());
        }
        trace!(height, buffered = self.future_messages.len(), "buffered future height message");
    }

    fn handle_current_height_message(
        &mut self,
        sender: ValidatorId,
        message: ConsensusMessage,
    ) -> Result<()> {
        let author = message.author();
        if !self.validators.contains(&author) {
            let error = ValidationError::NotValidator(author);
            self.final_state.reject(message.kind(), &error);
            return Ok(());
        }

        let relay = self
            .current
            .is_active()
            .then(|| message.clone());
        let fs = &mut self.final_state;
        let accepted = match message {
            ConsensusMessage::Proposal(m) => self.current.handle_proposal(fs, m)?,
            ConsensusMessage::Prepare(m) => self.current.handle_prepare(fs, m)?,
            ConsensusMessage::Commit(m) => self.current.handle_commit(fs, m)?,
            ConsensusMessage::RoundChange(m) => self.current.handle_round_change(fs, m)?,
        };

        // Only messages that passed validation travel further.
        if let Some(message) = relay.filter(|_| accepted) {
            self.final_state.gossiper.relay(&message, sender);
        }
        Ok(())
    }

    fn handle_new_chain_head(&mut self, header: BlockHeader) -> Result<()> {
        if header.number < self.chain_height() {
            trace!(number = header.number, "chain head does not advance the height");
            return Ok(());
        }
        self.start_new_height(header)
    }

    fn advance_if_finalized(&mut self) -> Result<()> {
        while let Some(header) = self.current.finalized_header().cloned() {
            self.start_new_height(header)?;
        }
        Ok(())
    }

    fn start_new_height(&mut self, parent: BlockHeader) -> Result<()> {
        let height = parent.number + 1;
        self.validators = self
            .final_state
            .validator_provider
            .validators_for_height(height);
        let local_id = self.final_state.local_id();

        self.current = if self.validators.contains(&local_id) {
            let distance = u32::try_from(self.final_state.config.future_messages_max_distance)
                .unwrap_or(u32::MAX);
            HeightManager::Active(ActiveHeightManager::new(
                parent,
                self.validators.clone(),
                local_id,
                distance,
            ))
        } else {
            info!(height, "not a validator of this height");
            self.final_state.round_timer.cancel();
            self.final_state.block_timer.cancel();
            HeightManager::Inactive(InactiveHeightManager::new(parent))
        };
        self.current.start(&mut self.final_state)?;

        for buffered in self.future_messages.retrieve_for_height(height) {
            if self.current.finalized_header().is_some() {
                break;
            }
            self.handle_current_height_message(buffered.sender, buffered.message)?;
        }
        Ok(())
    }
}
