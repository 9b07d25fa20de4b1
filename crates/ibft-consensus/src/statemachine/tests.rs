//! Controller scenarios driven with hand-built messages from the other
//! validators of a four node set.

use super::*;
use crate::collaborators::{
    BlockCreator, ChainAppender, StaticValidatorProvider, ValidatorMulticaster,
};
use crate::config::IbftConfig;
use crate::error::{ConsensusError, Result};
use crate::event_queue::{EventQueue, EventReceiver};
use crate::events::ConsensusEvent;
use crate::message::{Commit, ConsensusMessage, Prepare, Proposal, RoundChange};
use crate::message_factory::MessageFactory;
use crate::metrics::ConsensusMetrics;
use crate::validation::tests::Fixture;
use bytes::Bytes;
use ibft_types::{
    Block, BlockHeader, FinalizedBlock, NodeKey, RoundIdentifier, Signature, ValidatorId,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingNetwork {
    sent: Mutex<Vec<ConsensusMessage>>,
}

impl ValidatorMulticaster for RecordingNetwork {
    fn send(&self, data: Bytes, _denylist: &[ValidatorId]) {
        let message = ConsensusMessage::decode(&data).unwrap();
        self.sent.lock().push(message);
    }
}

#[derive(Default)]
struct RecordingChain {
    blocks: Mutex<Vec<FinalizedBlock>>,
    fail: AtomicBool,
}

impl ChainAppender for RecordingChain {
    fn append_block(&self, block: &FinalizedBlock) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConsensusError::ChainAppend("disk full".into()));
        }
        self.blocks.lock().push(block.clone());
        Ok(())
    }
}

struct EmptyBlocks {
    proposer: ValidatorId,
}

impl BlockCreator for EmptyBlocks {
    fn create_block(&self, parent: &BlockHeader, _round: RoundIdentifier) -> Result<Block> {
        Ok(Block::new(
            parent.number + 1,
            parent.digest(),
            self.proposer,
            parent.timestamp + 1,
            vec![],
        ))
    }
}

struct Harness {
    fx: Fixture,
    local: ValidatorId,
    controller: IbftController,
    events: EventReceiver,
    network: Arc<RecordingNetwork>,
    chain: Arc<RecordingChain>,
    metrics: ConsensusMetrics,
}

impl Harness {
    /// A node holding the key of validator `index` (in sorted order).
    fn validator(index: usize) -> Self {
        let fx = Fixture::new(4);
        let id = fx.validators.validators()[index];
        let key = fx.key_of(&id).clone();
        Self::with_key(fx, key)
    }

    fn with_key(fx: Fixture, key: NodeKey) -> Self {
        let local = key.id();
        let metrics = ConsensusMetrics::new();
        let (queue, events) = EventQueue::new(64);
        let network = Arc::new(RecordingNetwork::default());
        let chain = Arc::new(RecordingChain::default());
        let final_state = FinalState::new(
            IbftConfig::default(),
            Arc::new(key),
            network.clone(),
            Arc::new(EmptyBlocks { proposer: local }),
            chain.clone(),
            Arc::new(StaticValidatorProvider::new(fx.validators.clone())),
            queue,
            metrics.clone(),
        );
        let mut controller = IbftController::new(final_state, fx.parent.clone());
        controller.start().unwrap();
        Self {
            fx,
            local,
            controller,
            events,
            network,
            chain,
            metrics,
        }
    }

    fn id(&self, index: usize) -> ValidatorId {
        self.fx.validators.validators()[index]
    }

    fn deliver(&mut self, from: ValidatorId, message: ConsensusMessage) {
        self.controller
            .handle_event(ConsensusEvent::MessageReceived {
                sender: from,
                data: message.encode(),
            })
            .unwrap();
    }

    fn deliver_proposal(&mut self, proposal: Proposal) {
        let author = proposal.author();
        self.deliver(author, ConsensusMessage::Proposal(proposal));
    }

    fn prepare_from(&self, index: usize, proposal: &Proposal) -> Prepare {
        self.fx
            .factory_of(&self.id(index))
            .create_prepare(proposal.round(), proposal.digest())
            .unwrap()
    }

    fn commit_from(&self, index: usize, proposal: &Proposal) -> Commit {
        self.fx
            .factory_of(&self.id(index))
            .create_commit(proposal.round(), proposal.digest())
            .unwrap()
    }

    fn round_change_from(&self, index: usize, round: RoundIdentifier) -> RoundChange {
        self.fx
            .factory_of(&self.id(index))
            .create_round_change(round, None)
            .unwrap()
    }

    /// Messages authored by the local node, in send order.
    fn sent_by_local(&self) -> Vec<ConsensusMessage> {
        self.network
            .sent
            .lock()
            .iter()
            .filter(|m| m.author() == self.local)
            .cloned()
            .collect()
    }

    fn local_prepares(&self) -> Vec<Prepare> {
        self.sent_by_local()
            .into_iter()
            .filter_map(|m| match m {
                ConsensusMessage::Prepare(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    fn local_proposals(&self) -> Vec<Proposal> {
        self.sent_by_local()
            .into_iter()
            .filter_map(|m| match m {
                ConsensusMessage::Proposal(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    fn local_round_changes(&self) -> Vec<RoundChange> {
        self.sent_by_local()
            .into_iter()
            .filter_map(|m| match m {
                ConsensusMessage::RoundChange(rc) => Some(rc),
                _ => None,
            })
            .collect()
    }

    async fn next_event(&mut self) -> ConsensusEvent {
        tokio::time::timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("queue closed")
    }

    /// Proposal, prepares and commits from validators 1 and 2 for round 0.
    fn finalize_round_zero(&mut self, body: u8) -> Proposal {
        let proposal = self.fx.proposal(RoundIdentifier::new(10, 0), body, None);
        self.deliver_proposal(proposal.clone());
        for i in [1, 2] {
            let prepare = self.prepare_from(i, &proposal);
            self.deliver(self.id(i), ConsensusMessage::Prepare(prepare));
        }
        for i in [1, 2] {
            let commit = self.commit_from(i, &proposal);
            self.deliver(self.id(i), ConsensusMessage::Commit(commit));
        }
        proposal
    }
}

fn round(sequence: u64, round: u32) -> RoundIdentifier {
    RoundIdentifier::new(sequence, round)
}

#[tokio::test(start_paused = true)]
async fn test_validator_starts_round_zero() {
    let harness = Harness::validator(0);
    assert!(harness.controller.height_manager().is_active());
    assert_eq!(harness.controller.chain_height(), 10);
    assert_eq!(harness.controller.current_round(), Some(round(10, 0)));
    assert!(harness.controller.final_state().round_timer.is_running(&round(10, 0)));
    assert_eq!(harness.metrics.current_height.get(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_three_phase_happy_path() {
    let mut harness = Harness::validator(0);
    let proposal = harness.finalize_round_zero(1);

    let prepares = harness.local_prepares();
    assert_eq!(prepares.len(), 1);
    assert_eq!(prepares[0].digest(), proposal.digest());
    assert!(harness
        .sent_by_local()
        .iter()
        .any(|m| matches!(m, ConsensusMessage::Commit(c) if c.digest() == proposal.digest())));

    let blocks = harness.chain.blocks.lock().clone();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].digest(), proposal.digest());
    assert_eq!(blocks[0].round, 0);
    assert_eq!(blocks[0].seal_count(), 3);
    assert_eq!(blocks[0].valid_sealers().len(), 3);

    assert_eq!(harness.controller.chain_height(), 11);
    assert_eq!(harness.controller.current_round(), Some(round(11, 0)));
    assert_eq!(harness.metrics.blocks_finalized.get(), 1);
}

#[tokio::test]
async fn test_proposer_builds_and_proposes_on_block_timer() {
    // Validator 2 proposes round 0 of height 10.
    let mut harness = Harness::validator(2);
    assert_eq!(harness.fx.proposer(&round(10, 0)), harness.local);

    let event = harness.next_event().await;
    assert!(matches!(event, ConsensusEvent::BlockTimerExpiry(r) if r == round(10, 0)));
    harness.controller.handle_event(event).unwrap();

    let event = harness.next_event().await;
    assert!(matches!(event, ConsensusEvent::BlockCreated { .. }));
    harness.controller.handle_event(event).unwrap();

    let proposals = harness.local_proposals();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].round(), round(10, 0));
    assert!(proposals[0].round_change_certificate.is_none());
    harness
        .fx
        .validator()
        .validate_proposal(&proposals[0], &round(10, 0))
        .unwrap();

    // The proposer prepares its own block.
    let prepares = harness.local_prepares();
    assert_eq!(prepares.len(), 1);
    assert_eq!(prepares[0].digest(), proposals[0].digest());
}

#[tokio::test(start_paused = true)]
async fn test_received_messages_are_relayed_once() {
    let mut harness = Harness::validator(0);
    let proposal = harness.fx.proposal(round(10, 0), 1, None);
    harness.deliver_proposal(proposal.clone());
    harness.deliver_proposal(proposal.clone());

    let relayed = harness
        .network
        .sent
        .lock()
        .iter()
        .filter(|m| matches!(m, ConsensusMessage::Proposal(p) if *p == proposal))
        .count();
    assert_eq!(relayed, 1);
    assert_eq!(harness.local_prepares().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_messages_are_idempotent() {
    let mut harness = Harness::validator(0);
    let proposal = harness.fx.proposal(round(10, 0), 1, None);
    harness.deliver_proposal(proposal.clone());

    let prepare = harness.prepare_from(1, &proposal);
    for _ in 0..5 {
        harness.deliver(harness.id(1), ConsensusMessage::Prepare(prepare.clone()));
    }

    let manager = harness.controller.height_manager().as_active().unwrap();
    let state = manager.round(0).unwrap().state();
    // Local prepare plus one from validator 1.
    assert_eq!(state.prepare_count(), 2);
    assert_eq!(manager.round(0).unwrap().phase(), RoundPhase::AwaitingPrepareQuorum);
}

#[tokio::test(start_paused = true)]
async fn test_conflicting_proposal_is_rejected() {
    let mut harness = Harness::validator(0);
    harness.deliver_proposal(harness.fx.proposal(round(10, 0), 1, None));
    harness.deliver_proposal(harness.fx.proposal(round(10, 0), 2, None));

    assert_eq!(harness.local_prepares().len(), 1);
    assert_eq!(
        harness.metrics.rejected_count("proposal", "duplicate_proposal"),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_invalid_messages_are_counted_and_dropped() {
    let mut harness = Harness::validator(0);
    let proposal = harness.fx.proposal(round(10, 0), 1, None);
    harness.deliver_proposal(proposal.clone());

    let outsider = MessageFactory::new(Arc::new(NodeKey::from_seed(99)));
    let foreign = outsider
        .create_prepare(proposal.round(), proposal.digest())
        .unwrap();
    harness.deliver(foreign.author, ConsensusMessage::Prepare(foreign));
    assert_eq!(harness.metrics.rejected_count("prepare", "not_validator"), 1);

    let mut forged = harness.prepare_from(1, &proposal);
    forged.signature = Signature::from_bytes([7; 64]);
    harness.deliver(harness.id(1), ConsensusMessage::Prepare(forged));
    assert_eq!(
        harness.metrics.rejected_count("prepare", "invalid_signature"),
        1
    );

    harness
        .controller
        .handle_event(ConsensusEvent::MessageReceived {
            sender: harness.id(1),
            data: Bytes::from_static(b"not a message"),
        })
        .unwrap();
    assert_eq!(harness.metrics.rejected_count("unknown", "malformed"), 1);

    let state = harness
        .controller
        .height_manager()
        .as_active()
        .unwrap()
        .round(0)
        .unwrap()
        .state()
        .prepare_count();
    assert_eq!(state, 1);
}

#[tokio::test(start_paused = true)]
async fn test_round_expiry_broadcasts_round_change() {
    let mut harness = Harness::validator(0);
    harness
        .controller
        .handle_event(ConsensusEvent::RoundExpiry(round(10, 0)))
        .unwrap();

    assert_eq!(harness.controller.current_round(), Some(round(10, 1)));
    let round_changes = harness.local_round_changes();
    assert_eq!(round_changes.len(), 1);
    assert_eq!(round_changes[0].round(), round(10, 1));
    assert!(round_changes[0].prepared_certificate().is_none());
    assert_eq!(harness.metrics.round_changes.get(), 1);
    assert!(harness.controller.final_state().round_timer.is_running(&round(10, 1)));

    let manager = harness.controller.height_manager().as_active().unwrap();
    assert_eq!(manager.round(0).unwrap().phase(), RoundPhase::Abandoned);
}

#[tokio::test(start_paused = true)]
async fn test_stale_events_are_ignored() {
    let mut harness = Harness::validator(0);
    let events = [
        ConsensusEvent::RoundExpiry(round(9, 0)),
        ConsensusEvent::RoundExpiry(round(10, 3)),
        ConsensusEvent::BlockTimerExpiry(round(10, 0)),
        ConsensusEvent::BlockCreated {
            round: round(10, 0),
            block: harness.fx.block(harness.local, 1),
        },
    ];
    for event in events {
        harness.controller.handle_event(event).unwrap();
    }

    assert_eq!(harness.controller.current_round(), Some(round(10, 0)));
    assert!(harness.sent_by_local().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_prepared_block_is_carried_into_next_round() {
    // Validator 3 proposes round 1 of height 10.
    let mut harness = Harness::validator(3);
    assert_eq!(harness.fx.proposer(&round(10, 1)), harness.local);

    let proposal = harness.fx.proposal(round(10, 0), 1, None);
    harness.deliver_proposal(proposal.clone());
    for i in [0, 2] {
        let prepare = harness.prepare_from(i, &proposal);
        harness.deliver(harness.id(i), ConsensusMessage::Prepare(prepare));
    }
    assert!(harness
        .controller
        .height_manager()
        .as_active()
        .unwrap()
        .latest_prepared_certificate()
        .is_some());

    // No commits arrive; the round times out.
    harness
        .controller
        .handle_event(ConsensusEvent::RoundExpiry(round(10, 0)))
        .unwrap();
    let carried = harness.local_round_changes();
    assert_eq!(carried.len(), 1);
    assert_eq!(
        carried[0].prepared_certificate().map(|c| c.digest()),
        Some(proposal.digest())
    );

    for i in [0, 1] {
        let rc = harness.round_change_from(i, round(10, 1));
        harness.deliver(harness.id(i), ConsensusMessage::RoundChange(rc));
    }

    let proposals = harness.local_proposals();
    assert_eq!(proposals.len(), 1);
    let reproposal = &proposals[0];
    assert_eq!(reproposal.round(), round(10, 1));
    assert_eq!(reproposal.digest(), proposal.digest());
    assert_eq!(
        reproposal
            .round_change_certificate
            .as_ref()
            .map(|c| c.round_changes.len()),
        Some(3)
    );
    harness
        .fx
        .validator()
        .validate_proposal(reproposal, &round(10, 1))
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_justified_future_round_proposal_moves_the_height() {
    let mut harness = Harness::validator(0);
    let target = round(10, 1);
    let certificate = harness.fx.round_change_certificate(target, None);
    let proposal = harness.fx.proposal(target, 5, Some(certificate));
    harness.deliver_proposal(proposal.clone());

    assert_eq!(harness.controller.current_round(), Some(target));
    let prepares = harness.local_prepares();
    assert_eq!(prepares.len(), 1);
    assert_eq!(prepares[0].round(), target);
    assert_eq!(prepares[0].digest(), proposal.digest());
}

#[tokio::test(start_paused = true)]
async fn test_unjustified_future_round_proposal_is_rejected() {
    let mut harness = Harness::validator(0);
    let proposal = harness.fx.proposal(round(10, 1), 5, None);
    harness.deliver_proposal(proposal);

    assert_eq!(harness.controller.current_round(), Some(round(10, 0)));
    assert!(harness.local_prepares().is_empty());
    assert_eq!(
        harness
            .metrics
            .rejected_count("proposal", "invalid_round_change_certificate"),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_future_height_messages_replay_after_finalization() {
    let mut harness = Harness::validator(0);
    let block = harness.fx.block(harness.fx.proposer(&round(10, 0)), 1);
    let next = harness.fx.on_top_of(block.header.clone());
    let ahead = next.proposal(round(11, 0), 3, None);
    harness.deliver_proposal(ahead.clone());
    assert!(harness.local_prepares().is_empty());

    harness.finalize_round_zero(1);

    assert_eq!(harness.controller.chain_height(), 11);
    let prepares = harness.local_prepares();
    assert_eq!(prepares.len(), 2);
    assert_eq!(prepares[1].round(), round(11, 0));
    assert_eq!(prepares[1].digest(), ahead.digest());
}

#[tokio::test(start_paused = true)]
async fn test_new_chain_head_starts_next_height() {
    let mut harness = Harness::validator(0);
    let imported = harness.fx.block(harness.id(1), 9);
    harness
        .controller
        .handle_event(ConsensusEvent::NewChainHead(imported.header.clone()))
        .unwrap();
    assert_eq!(harness.controller.chain_height(), 11);

    // An older head changes nothing.
    harness
        .controller
        .handle_event(ConsensusEvent::NewChainHead(harness.fx.parent.clone()))
        .unwrap();
    assert_eq!(harness.controller.chain_height(), 11);
    assert_eq!(
        harness.controller.height_manager().parent_header(),
        &imported.header
    );
}

#[tokio::test(start_paused = true)]
async fn test_non_validator_only_follows() {
    let fx = Fixture::new(4);
    let mut harness = Harness::with_key(fx, NodeKey::from_seed(50));
    assert!(!harness.controller.height_manager().is_active());
    assert_eq!(harness.controller.current_round(), None);

    harness.deliver_proposal(harness.fx.proposal(round(10, 0), 1, None));
    assert!(harness.sent_by_local().is_empty());
    assert_eq!(harness.controller.chain_height(), 10);
    // Followers stay silent: nothing is relayed either.
    assert!(harness.network.sent.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_failed_import_keeps_the_height() {
    let mut harness = Harness::validator(0);
    harness.chain.fail.store(true, Ordering::SeqCst);
    harness.finalize_round_zero(1);

    assert!(harness.chain.blocks.lock().is_empty());
    assert_eq!(harness.controller.chain_height(), 10);
    let manager = harness.controller.height_manager().as_active().unwrap();
    assert_eq!(manager.round(0).unwrap().phase(), RoundPhase::Committed);
    assert!(manager.finalized_header().is_none());

    // The round timer still runs and moves the height on.
    assert!(harness.controller.final_state().round_timer.is_running(&round(10, 0)));
    harness
        .controller
        .handle_event(ConsensusEvent::RoundExpiry(round(10, 0)))
        .unwrap();
    assert_eq!(harness.controller.current_round(), Some(round(10, 1)));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_messages_are_not_relayed() {
    let mut harness = Harness::validator(0);
    let proposal = harness.fx.proposal(round(10, 0), 1, None);
    harness.deliver_proposal(proposal.clone());
    let from_one = |harness: &Harness| {
        harness
            .network
            .sent
            .lock()
            .iter()
            .filter(|m| m.author() == harness.id(1))
            .count()
    };

    let mut forged = harness.prepare_from(1, &proposal);
    forged.signature = Signature::from_bytes([7; 64]);
    harness.deliver(harness.id(2), ConsensusMessage::Prepare(forged));
    assert_eq!(
        harness.metrics.rejected_count("prepare", "invalid_signature"),
        1
    );
    assert_eq!(from_one(&harness), 0);

    // A prepare for another block is rejected too.
    let other = harness.fx.proposal(round(10, 0), 2, None);
    let mismatched = harness.prepare_from(1, &other);
    harness.deliver(harness.id(1), ConsensusMessage::Prepare(mismatched));
    assert_eq!(from_one(&harness), 0);

    let genuine = harness.prepare_from(1, &proposal);
    harness.deliver(harness.id(2), ConsensusMessage::Prepare(genuine.clone()));
    let sent = harness.network.sent.lock().clone();
    assert!(sent
        .iter()
        .any(|m| matches!(m, ConsensusMessage::Prepare(p) if *p == genuine)));
}

#[tokio::test(start_paused = true)]
async fn test_round_changes_beyond_the_window_are_dropped() {
    let mut harness = Harness::validator(0);
    let window = IbftConfig::default().future_messages_max_distance as u32;
    for r in 1..=window + 40 {
        let rc = harness.round_change_from(1, round(10, r));
        harness.deliver(harness.id(1), ConsensusMessage::RoundChange(rc));
    }

    assert_eq!(harness.controller.current_round(), Some(round(10, 0)));
    let manager = harness.controller.height_manager().as_active().unwrap();
    for r in 1..=window {
        assert_eq!(manager.round_change_count(r), 1);
    }
    for r in window + 1..=window + 40 {
        assert_eq!(manager.round_change_count(r), 0);
    }
    let relayed = harness
        .network
        .sent
        .lock()
        .iter()
        .filter(|m| matches!(m, ConsensusMessage::RoundChange(_)))
        .count();
    assert_eq!(relayed, window as usize);
}

#[tokio::test(start_paused = true)]
async fn test_flooded_future_height_keeps_honest_messages() {
    let mut harness = Harness::validator(0);
    let block = harness.fx.block(harness.fx.proposer(&round(10, 0)), 1);
    let next = harness.fx.on_top_of(block.header.clone());

    // An outsider's messages never reach the buffer.
    let outsider = MessageFactory::new(Arc::new(NodeKey::from_seed(99)));
    for r in 1..=200 {
        let rc = outsider.create_round_change(round(11, r), None).unwrap();
        harness.deliver(rc.author(), ConsensusMessage::RoundChange(rc));
    }
    assert_eq!(
        harness.metrics.rejected_count("round_change", "not_validator"),
        200
    );

    // A validator flooding the next height cannot push others out.
    let limit = IbftConfig::default().future_messages_limit as u32;
    for r in 1..=limit {
        let rc = harness.round_change_from(1, round(11, r));
        harness.deliver(harness.id(1), ConsensusMessage::RoundChange(rc));
    }
    let ahead = next.proposal(round(11, 0), 3, None);
    harness.deliver_proposal(ahead.clone());

    harness.finalize_round_zero(1);

    assert_eq!(harness.controller.chain_height(), 11);
    let prepares = harness.local_prepares();
    assert_eq!(prepares.len(), 2);
    assert_eq!(prepares[1].round(), round(11, 0));
    assert_eq!(prepares[1].digest(), ahead.digest());
}

#[tokio::test(start_paused = true)]
async fn test_forged_future_message_does_not_shadow_genuine_copy() {
    let mut harness = Harness::validator(0);
    let block = harness.fx.block(harness.fx.proposer(&round(10, 0)), 1);
    let next = harness.fx.on_top_of(block.header.clone());
    let ahead = next.proposal(round(11, 0), 3, None);

    let mut forged = ahead.clone();
    forged.signed.signature = Signature::from_bytes([7; 64]);
    harness.deliver_proposal(forged);
    assert_eq!(
        harness.metrics.rejected_count("proposal", "invalid_signature"),
        1
    );

    harness.deliver(harness.id(1), ConsensusMessage::Proposal(ahead.clone()));
    harness.finalize_round_zero(1);

    let prepares = harness.local_prepares();
    assert_eq!(prepares.len(), 2);
    assert_eq!(prepares[1].digest(), ahead.digest());
}
