//! One round of the three-phase exchange.

use super::final_state::FinalState;
use super::round_state::{RoundPhase, RoundState};
use crate::error::Result;
use crate::message::{Commit, ConsensusMessage, Prepare, PreparedCertificate, Proposal, RoundChangeCertificate};
use crate::validation::MessageValidator;
use ibft_types::{Block, BlockHeader, FinalizedBlock, RoundIdentifier};
use tracing::{debug, error, info, trace};

/// A single round: proposal, prepare quorum, commit quorum, import.
pub struct IbftRound {
    state: RoundState,
    finalized: Option<BlockHeader>,
}

impl IbftRound {
    /// Creates a round waiting for its proposal.
    pub fn new(round: RoundIdentifier, quorum: usize) -> Self {
        Self {
            state: RoundState::new(round, quorum),
            finalized: None,
        }
    }

    /// The round identifier.
    pub fn round(&self) -> RoundIdentifier {
        self.state.round()
    }

    /// Current phase.
    pub fn phase(&self) -> RoundPhase {
        self.state.phase()
    }

    /// Collected messages.
    pub fn state(&self) -> &RoundState {
        &self.state
    }

    /// Header of the block imported by this round.
    pub fn finalized_header(&self) -> Option<&BlockHeader> {
        self.finalized.as_ref()
    }

    /// The round's prepared certificate, once prepared.
    pub fn prepared_certificate(&self) -> Option<(PreparedCertificate, Block)> {
        self.state.prepared_certificate()
    }

    /// Marks the round as left behind.
    pub fn abandon(&mut self) {
        if !self.state.phase().is_terminal() {
            self.state.set_phase(RoundPhase::Abandoned);
        }
    }

    /// Proposes `block` as the local proposer of this round.
    pub fn propose_block(
        &mut self,
        fs: &mut FinalState,
        block: Block,
        certificate: Option<RoundChangeCertificate>,
    ) -> Result<()> {
        if self.state.proposal().is_some() || self.phase().is_terminal() {
            debug!(round = %self.round(), "round already has a proposal, not proposing");
            return Ok(());
        }
        let proposal = fs
            .factory
            .create_proposal(self.round(), block, certificate)?;
        info!(round = %self.round(), digest = %proposal.digest(), "proposing block");
        fs.broadcast(&ConsensusMessage::Proposal(proposal.clone()));
        self.accept_proposal(fs, proposal)
    }

    /// Handles a received proposal. Returns true if it was accepted.
    pub fn handle_proposal(
        &mut self,
        fs: &mut FinalState,
        validator: &MessageValidator,
        proposal: Proposal,
    ) -> Result<bool> {
        if self.phase().is_terminal() {
            trace!(round = %self.round(), "round closed, ignoring proposal");
            return Ok(false);
        }
        if let Some(accepted) = self.state.proposed_digest() {
            if accepted != proposal.digest() {
                fs.reject("proposal", &crate::ValidationError::DuplicateProposal);
            }
            return Ok(false);
        }
        if let Err(e) = validator.validate_proposal(&proposal, &self.round()) {
            fs.reject("proposal", &e);
            return Ok(false);
        }
        fs.metrics.record_accepted("proposal");
        self.accept_proposal(fs, proposal)?;
        Ok(true)
    }

    /// Accepts a proposal that has already been validated.
    pub(crate) fn accept_proposal(&mut self, fs: &mut FinalState, proposal: Proposal) -> Result<()> {
        let digest = proposal.digest();
        debug!(round = %self.round(), %digest, author = %proposal.author(), "proposal accepted");
        self.state.set_proposal(proposal);

        let prepare = fs.factory.create_prepare(self.round(), digest)?;
        fs.broadcast(&ConsensusMessage::Prepare(prepare.clone()));
        self.state.add_prepare(prepare);
        self.update(fs)
    }

    /// Handles a received prepare. Returns true if it was valid.
    pub fn handle_prepare(
        &mut self,
        fs: &mut FinalState,
        validator: &MessageValidator,
        prepare: Prepare,
    ) -> Result<bool> {
        if self.phase().is_terminal() {
            return Ok(false);
        }
        if let Err(e) =
            validator.validate_prepare(&prepare, &self.round(), self.state.proposed_digest())
        {
            fs.reject("prepare", &e);
            return Ok(false);
        }
        fs.metrics.record_accepted("prepare");
        if self.state.add_prepare(prepare) {
            self.update(fs)?;
        }
        Ok(true)
    }

    /// Handles a received commit. Returns true if it was valid.
    pub fn handle_commit(
        &mut self,
        fs: &mut FinalState,
        validator: &MessageValidator,
        commit: Commit,
    ) -> Result<bool> {
        if self.phase().is_terminal() {
            return Ok(false);
        }
        if let Err(e) =
            validator.validate_commit(&commit, &self.round(), self.state.proposed_digest())
        {
            fs.reject("commit", &e);
            return Ok(false);
        }
        fs.metrics.record_accepted("commit");
        if self.state.add_commit(commit) {
            self.update(fs)?;
        }
        Ok(true)
    }

    fn update(&mut self, fs: &mut FinalState) -> Result<()> {
        if self.phase() == RoundPhase::AwaitingPrepareQuorum && self.state.is_prepared() {
            self.state.set_phase(RoundPhase::Prepared);
            let Some(digest) = self.state.proposed_digest() else {
                return Ok(());
            };
            info!(round = %self.round(), %digest, prepares = self.state.prepare_count(), "prepared");
            let commit = fs.factory.create_commit(self.round(), digest)?;
            fs.broadcast(&ConsensusMessage::Commit(commit.clone()));
            self.state.add_commit(commit);
        }

        // A commit quorum implies an honest prepare quorum, so a node that
        // missed prepares may still commit.
        if matches!(
            self.phase(),
            RoundPhase::AwaitingPrepareQuorum | RoundPhase::Prepared
        ) && self.state.is_committed()
        {
            self.state.set_phase(RoundPhase::Committed);
            self.import(fs);
        }
        Ok(())
    }

    fn import(&mut self, fs: &mut FinalState) {
        let Some(proposal) = self.state.proposal() else {
            return;
        };
        let finalized = FinalizedBlock::new(
            proposal.block.clone(),
            self.round().round,
            self.state.commit_seals(),
        );
        match fs.chain.append_block(&finalized) {
            Ok(()) => {
                info!(
                    height = finalized.number(),
                    round = self.round().round,
                    digest = %finalized.digest(),
                    seals = finalized.seal_count(),
                    "block finalized"
                );
                fs.metrics.blocks_finalized.inc();
                self.finalized = Some(finalized.block.header);
            }
            Err(e) => {
                error!(round = %self.round(), error = %e, "failed to import committed block");
            }
        }
    }
}
