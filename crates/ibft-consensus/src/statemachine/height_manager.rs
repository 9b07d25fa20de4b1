//! Height managers: everything that happens while deciding one height.
//!
//! A node that is a validator of the height runs an
//! [`ActiveHeightManager`]; any other node runs an
//! [`InactiveHeightManager`] that only remembers the parent header.

use super::final_state::FinalState;
use super::round::IbftRound;
use super::round_change::RoundChangeManager;
use crate::error::Result;
use crate::message::{
    Commit, ConsensusMessage, Prepare, PreparedCertificate, Proposal, RoundChange,
    RoundChangeCertificate,
};
use crate::validation::MessageValidator;
use crate::validator::ValidatorSet;
use ibft_types::{Block, BlockHeader, RoundIdentifier, ValidatorId};
use std::collections::BTreeMap;
use tracing::{debug, info, trace, warn};

/// Operations every height manager supports.
pub trait BlockHeightManager {
    /// Starts round 0.
    fn start(&mut self, fs: &mut FinalState) -> Result<()>;

    /// The block period for `round` has elapsed.
    fn handle_block_timer_expiry(&mut self, fs: &mut FinalState, round: RoundIdentifier)
        -> Result<()>;

    /// The round timer for `round` fired.
    fn handle_round_expiry(&mut self, fs: &mut FinalState, round: RoundIdentifier) -> Result<()>;

    /// The block builder delivered `block` for `round`.
    fn handle_block_created(
        &mut self,
        fs: &mut FinalState,
        round: RoundIdentifier,
        block: Block,
    ) -> Result<()>;

    /// A proposal for this height arrived.
    ///
    /// The message handlers return true when the message was valid and
    /// accepted, which is the condition for relaying it.
    fn handle_proposal(&mut self, fs: &mut FinalState, proposal: Proposal) -> Result<bool>;

    /// A prepare for this height arrived.
    fn handle_prepare(&mut self, fs: &mut FinalState, prepare: Prepare) -> Result<bool>;

    /// A commit for this height arrived.
    fn handle_commit(&mut self, fs: &mut FinalState, commit: Commit) -> Result<bool>;

    /// A round change for this height arrived.
    fn handle_round_change(&mut self, fs: &mut FinalState, round_change: RoundChange)
        -> Result<bool>;

    /// Height being decided.
    fn chain_height(&self) -> u64;

    /// Header of the block this height builds on.
    fn parent_header(&self) -> &BlockHeader;

    /// Header of the block imported for this height, once imported.
    fn finalized_header(&self) -> Option<&BlockHeader> {
        None
    }

    /// The active round.
    fn current_round(&self) -> Option<RoundIdentifier> {
        None
    }
}

/// Height manager for nodes outside the validator set.
pub struct InactiveHeightManager {
    parent: BlockHeader,
}

impl InactiveHeightManager {
    /// Creates a manager for the height after `parent`.
    pub fn new(parent: BlockHeader) -> Self {
        Self { parent }
    }
}

impl BlockHeightManager for InactiveHeightManager {
    fn start(&mut self, _fs: &mut FinalState) -> Result<()> {
        Ok(())
    }

    fn handle_block_timer_expiry(
        &mut self,
        _fs: &mut FinalState,
        _round: RoundIdentifier,
    ) -> Result<()> {
        Ok(())
    }

    fn handle_round_expiry(&mut self, _fs: &mut FinalState, _round: RoundIdentifier) -> Result<()> {
        Ok(())
    }

    fn handle_block_created(
        &mut self,
        _fs: &mut FinalState,
        _round: RoundIdentifier,
        _block: Block,
    ) -> Result<()> {
        Ok(())
    }

    fn handle_proposal(&mut self, _fs: &mut FinalState, _proposal: Proposal) -> Result<bool> {
        Ok(false)
    }

    fn handle_prepare(&mut self, _fs: &mut FinalState, _prepare: Prepare) -> Result<bool> {
        Ok(false)
    }

    fn handle_commit(&mut self, _fs: &mut FinalState, _commit: Commit) -> Result<bool> {
        Ok(false)
    }

    fn handle_round_change(
        &mut self,
        _fs: &mut FinalState,
        _round_change: RoundChange,
    ) -> Result<bool> {
        Ok(false)
    }

    fn chain_height(&self) -> u64 {
        self.parent.number + 1
    }

    fn parent_header(&self) -> &BlockHeader {
        &self.parent
    }
}

/// Height manager for a validator of the height.
pub struct ActiveHeightManager {
    parent: BlockHeader,
    validator: MessageValidator,
    local_id: ValidatorId,
    current: u32,
    rounds: BTreeMap<u32, IbftRound>,
    round_changes: RoundChangeManager,
    latest_prepared: Option<(PreparedCertificate, Block)>,
    pending_block: Option<(RoundIdentifier, Option<RoundChangeCertificate>)>,
    finalized: Option<BlockHeader>,
    max_round_distance: u32,
}

impl ActiveHeightManager {
    /// Creates a manager for the height after `parent`.
    pub fn new(
        parent: BlockHeader,
        validators: ValidatorSet,
        local_id: ValidatorId,
        max_round_distance: u32,
    ) -> Self {
        let quorum = validators.quorum_size();
        Self {
            validator: MessageValidator::new(validators, parent.clone()),
            parent,
            local_id,
            current: 0,
            rounds: BTreeMap::new(),
            round_changes: RoundChangeManager::new(quorum),
            latest_prepared: None,
            pending_block: None,
            finalized: None,
            max_round_distance,
        }
    }

    fn round_id(&self, round: u32) -> RoundIdentifier {
        RoundIdentifier::new(self.chain_height(), round)
    }

    fn is_proposer(&self, round: &RoundIdentifier) -> bool {
        self.validator
            .validators()
            .is_proposer(&self.local_id, round)
    }

    fn round_mut(&mut self, round: u32) -> &mut IbftRound {
        let id = self.round_id(round);
        let quorum = self.validator.validators().quorum_size();
        self.rounds
            .entry(round)
            .or_insert_with(|| IbftRound::new(id, quorum))
    }

    /// Latest prepared certificate seen at this height.
    pub fn latest_prepared_certificate(&self) -> Option<&PreparedCertificate> {
        self.latest_prepared.as_ref().map(|(c, _)| c)
    }

    /// The round with the given number, if created.
    pub fn round(&self, round: u32) -> Option<&IbftRound> {
        self.rounds.get(&round)
    }

    /// Number of validators that asked to move to `round`.
    pub fn round_change_count(&self, round: u32) -> usize {
        self.round_changes.count(round)
    }

    fn is_stale(&self, round: &RoundIdentifier) -> bool {
        round.round < self.current
    }

    fn is_too_far(&self, round: &RoundIdentifier) -> bool {
        round.round > self.current.saturating_add(self.max_round_distance)
    }

    fn request_block(
        &mut self,
        fs: &mut FinalState,
        round: RoundIdentifier,
        certificate: Option<RoundChangeCertificate>,
    ) {
        debug!(%round, "requesting block");
        self.pending_block = Some((round, certificate));
        fs.block_creation.request(self.parent.clone(), round);
    }

    fn propose(
        &mut self,
        fs: &mut FinalState,
        round: RoundIdentifier,
        block: Block,
        certificate: Option<RoundChangeCertificate>,
    ) -> Result<()> {
        self.round_mut(round.round)
            .propose_block(fs, block, certificate)?;
        self.after_round_update(fs, round.round);
        Ok(())
    }

    /// Moves the height to `target`, abandoning every lower round.
    /// Rounds are never revisited.
    fn advance_to(&mut self, fs: &mut FinalState, target: u32) {
        for round in self.rounds.values_mut() {
            if round.round().round < target {
                round.abandon();
            }
        }
        self.current = target;
        self.round_mut(target);
        self.round_changes.discard_rounds_below(target);

        self.pending_block = None;
        fs.block_creation.cancel();
        fs.block_timer.cancel();
        let round = self.round_id(target);
        fs.round_timer.start(round);
        fs.metrics.set_position(round.sequence, target);
        info!(%round, "moved to round");
    }

    fn after_round_update(&mut self, fs: &mut FinalState, round: u32) {
        let Some(r) = self.rounds.get(&round) else {
            return;
        };

        let newer = self
            .latest_prepared
            .as_ref()
            .map_or(true, |(c, _)| c.round().round < round);
        if newer {
            if let Some(prepared) = r.prepared_certificate() {
                self.latest_prepared = Some(prepared);
            }
        }

        if self.finalized.is_none() {
            if let Some(header) = r.finalized_header() {
                self.finalized = Some(header.clone());
                fs.round_timer.cancel();
                fs.block_timer.cancel();
            }
        }
    }

    /// Handles a round change known to be valid.
    fn accept_round_change(&mut self, fs: &mut FinalState, round_change: RoundChange) -> Result<()> {
        let Some(artifacts) = self.round_changes.append(round_change) else {
            return Ok(());
        };
        let target = artifacts.round;
        info!(round = %target, "round change quorum");

        if target.round > self.current {
            fs.metrics.round_changes.inc();
            self.advance_to(fs, target.round);
        }
        if target.round != self.current || !self.is_proposer(&target) {
            return Ok(());
        }

        match artifacts.prepared {
            Some((certificate, block)) => {
                info!(round = %target, prepared_in = certificate.round().round, "re-proposing prepared block");
                self.propose(fs, target, block, Some(artifacts.certificate))
            }
            None => {
                self.request_block(fs, target, Some(artifacts.certificate));
                Ok(())
            }
        }
    }
}

impl BlockHeightManager for ActiveHeightManager {
    fn start(&mut self, fs: &mut FinalState) -> Result<()> {
        let round = self.round_id(0);
        self.round_mut(0);
        fs.round_timer.start(round);
        fs.metrics.set_position(round.sequence, 0);

        let proposer = self.is_proposer(&round);
        if proposer {
            fs.block_timer.start(round, &self.parent);
        }
        info!(height = round.sequence, proposer, "starting height");
        Ok(())
    }

    fn handle_block_timer_expiry(
        &mut self,
        fs: &mut FinalState,
        round: RoundIdentifier,
    ) -> Result<()> {
        if round != self.round_id(self.current) || !self.is_proposer(&round) {
            trace!(%round, "ignoring stale block timer");
            return Ok(());
        }
        let has_proposal = self
            .rounds
            .get(&round.round)
            .is_some_and(|r| r.state().proposal().is_some());
        if has_proposal || self.pending_block.is_some() {
            return Ok(());
        }
        self.request_block(fs, round, None);
        Ok(())
    }

    fn handle_round_expiry(&mut self, fs: &mut FinalState, round: RoundIdentifier) -> Result<()> {
        if round != self.round_id(self.current) || self.finalized.is_some() {
            trace!(%round, "ignoring stale round expiry");
            return Ok(());
        }
        warn!(%round, "round expired");
        fs.metrics.round_changes.inc();

        let next = round.next_round();
        self.advance_to(fs, next.round);

        let round_change = fs
            .factory
            .create_round_change(next, self.latest_prepared.clone())?;
        fs.broadcast(&ConsensusMessage::RoundChange(round_change.clone()));
        self.accept_round_change(fs, round_change)
    }

    fn handle_block_created(
        &mut self,
        fs: &mut FinalState,
        round: RoundIdentifier,
        block: Block,
    ) -> Result<()> {
        let certificate = match self.pending_block.take() {
            Some((pending, certificate)) if pending == round && round.round == self.current => {
                certificate
            }
            other => {
                self.pending_block = other;
                trace!(%round, "ignoring block for stale request");
                return Ok(());
            }
        };
        if let Err(e) = self.validator.validate_block(&block, block.digest()) {
            warn!(%round, error = %e, "block builder produced an invalid block");
            return Ok(());
        }
        self.propose(fs, round, block, certificate)
    }

    fn handle_proposal(&mut self, fs: &mut FinalState, proposal: Proposal) -> Result<bool> {
        let round = proposal.round();
        if self.is_stale(&round) {
            debug!(%round, "ignoring proposal for old round");
            return Ok(false);
        }

        let accepted = if round.round > self.current {
            // Only a justified proposal may pull the height forward.
            if let Err(e) = self.validator.validate_proposal(&proposal, &round) {
                fs.reject("proposal", &e);
                return Ok(false);
            }
            fs.metrics.record_accepted("proposal");
            fs.metrics.round_changes.inc();
            self.advance_to(fs, round.round);
            self.round_mut(round.round).accept_proposal(fs, proposal)?;
            true
        } else {
            let (id, quorum) = (round, self.validator.validators().quorum_size());
            self.rounds
                .entry(round.round)
                .or_insert_with(|| IbftRound::new(id, quorum))
                .handle_proposal(fs, &self.validator, proposal)?
        };
        self.after_round_update(fs, round.round);
        Ok(accepted)
    }

    fn handle_prepare(&mut self, fs: &mut FinalState, prepare: Prepare) -> Result<bool> {
        let round = prepare.round();
        if self.is_stale(&round) || self.is_too_far(&round) {
            debug!(%round, "ignoring prepare outside the round window");
            return Ok(false);
        }
        let quorum = self.validator.validators().quorum_size();
        let accepted = self
            .rounds
            .entry(round.round)
            .or_insert_with(|| IbftRound::new(round, quorum))
            .handle_prepare(fs, &self.validator, prepare)?;
        self.after_round_update(fs, round.round);
        Ok(accepted)
    }

    fn handle_commit(&mut self, fs: &mut FinalState, commit: Commit) -> Result<bool> {
        let round = commit.round();
        if self.is_stale(&round) || self.is_too_far(&round) {
            debug!(%round, "ignoring commit outside the round window");
            return Ok(false);
        }
        let quorum = self.validator.validators().quorum_size();
        let accepted = self
            .rounds
            .entry(round.round)
            .or_insert_with(|| IbftRound::new(round, quorum))
            .handle_commit(fs, &self.validator, commit)?;
        self.after_round_update(fs, round.round);
        Ok(accepted)
    }

    fn handle_round_change(
        &mut self,
        fs: &mut FinalState,
        round_change: RoundChange,
    ) -> Result<bool> {
        let round = round_change.round();
        if self.is_stale(&round) || round.round == 0 {
            debug!(%round, "ignoring round change for old round");
            return Ok(false);
        }
        if self.is_too_far(&round) {
            debug!(%round, current = self.current, "ignoring round change too far ahead");
            return Ok(false);
        }
        if let Err(e) = self.validator.validate_round_change(&round_change) {
            fs.reject("round_change", &e);
            return Ok(false);
        }
        fs.metrics.record_accepted("round_change");
        self.accept_round_change(fs, round_change)?;
        Ok(true)
    }

    fn chain_height(&self) -> u64 {
        self.parent.number + 1
    }

    fn parent_header(&self) -> &BlockHeader {
        &self.parent
    }

    fn finalized_header(&self) -> Option<&BlockHeader> {
        self.finalized.as_ref()
    }

    fn current_round(&self) -> Option<RoundIdentifier> {
        Some(self.round_id(self.current))
    }
}

/// The height manager of the current height.
pub enum HeightManager {
    /// The local node validates this height.
    Active(ActiveHeightManager),
    /// The local node only follows this height.
    Inactive(InactiveHeightManager),
}

impl HeightManager {
    fn inner(&self) -> &dyn BlockHeightManager {
        match self {
            HeightManager::Active(m) => m,
            HeightManager::Inactive(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn BlockHeightManager {
        match self {
            HeightManager::Active(m) => m,
            HeightManager::Inactive(m) => m,
        }
    }

    /// Returns true for a validator of the height.
    pub fn is_active(&self) -> bool {
        matches!(self, HeightManager::Active(_))
    }

    /// Returns the active manager, if any.
    pub fn as_active(&self) -> Option<&ActiveHeightManager> {
        match self {
            HeightManager::Active(m) => Some(m),
            HeightManager::Inactive(_) => None,
        }
    }
}

impl BlockHeightManager for HeightManager {
    fn start(&mut self, fs: &mut FinalState) -> Result<()> {
        self.inner_mut().start(fs)
    }

    fn handle_block_timer_expiry(
        &mut self,
        fs: &mut FinalState,
        round: RoundIdentifier,
    ) -> Result<()> {
        self.inner_mut().handle_block_timer_expiry(fs, round)
    }

    fn handle_round_expiry(&mut self, fs: &mut FinalState, round: RoundIdentifier) -> Result<()> {
        self.inner_mut().handle_round_expiry(fs, round)
    }

    fn handle_block_created(
        &mut self,
        fs: &mut FinalState,
        round: RoundIdentifier,
        block: Block,
    ) -> Result<()> {
        self.inner_mut().handle_block_created(fs, round, block)
    }

    fn handle_proposal(&mut self, fs: &mut FinalState, proposal: Proposal) -> Result<bool> {
        self.inner_mut().handle_proposal(fs, proposal)
    }

    fn handle_prepare(&mut self, fs: &mut FinalState, prepare: Prepare) -> Result<bool> {
        self.inner_mut().handle_prepare(fs, prepare)
    }

    fn handle_commit(&mut self, fs: &mut FinalState, commit: Commit) -> Result<bool> {
        self.inner_mut().handle_commit(fs, commit)
    }

    fn handle_round_change(
        &mut self,
        fs: &mut FinalState,
        round_change: RoundChange,
    ) -> Result<bool> {
        self.inner_mut().handle_round_change(fs, round_change)
    }

    fn chain_height(&self) -> u64 {
        self.inner().chain_height()
    }

    fn parent_header(&self) -> &BlockHeader {
        self.inner().parent_header()
    }

    fn finalized_header(&self) -> Option<&BlockHeader> {
        self.inner().finalized_header()
    }

    fn current_round(&self) -> Option<RoundIdentifier> {
        self.inner().current_round()
    }
}
