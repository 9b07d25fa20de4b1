//! Messages collected for one round.

use crate::message::{Commit, Prepare, PreparedCertificate, Proposal};
use ibft_types::{Block, BlockDigest, RoundIdentifier, Signature, ValidatorId};
use std::collections::BTreeMap;

/// Phase of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// No proposal accepted yet.
    AwaitingProposal,
    /// Proposal accepted, collecting prepares.
    AwaitingPrepareQuorum,
    /// Prepare quorum reached, commit sent.
    Prepared,
    /// Commit quorum reached.
    Committed,
    /// The height moved to a later round.
    Abandoned,
}

impl RoundPhase {
    /// Returns true for phases that ignore further messages.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundPhase::Committed | RoundPhase::Abandoned)
    }
}

/// Proposal, prepares and commits of one round.
///
/// Prepares and commits may arrive before the proposal. They are kept, one
/// per author, and those whose digest differs from the proposal are dropped
/// once it is accepted.
#[derive(Debug)]
pub struct RoundState {
    round: RoundIdentifier,
    quorum: usize,
    phase: RoundPhase,
    proposal: Option<Proposal>,
    prepares: BTreeMap<ValidatorId, Prepare>,
    commits: BTreeMap<ValidatorId, Commit>,
}

impl RoundState {
    /// Creates an empty round.
    pub fn new(round: RoundIdentifier, quorum: usize) -> Self {
        Self {
            round,
            quorum,
            phase: RoundPhase::AwaitingProposal,
            proposal: None,
            prepares: BTreeMap::new(),
            commits: BTreeMap::new(),
        }
    }

    pub fn round(&self) -> RoundIdentifier {
        self.round
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: RoundPhase) {
        self.phase = phase;
    }

    pub fn proposal(&self) -> Option<&Proposal> {
        self.proposal.as_ref()
    }

    /// Digest of the accepted proposal.
    pub fn proposed_digest(&self) -> Option<BlockDigest> {
        self.proposal.as_ref().map(Proposal::digest)
    }

    /// Accepts the proposal and discards held messages for other digests.
    pub fn set_proposal(&mut self, proposal: Proposal) {
        let digest = proposal.digest();
        self.prepares.retain(|_, p| p.digest() == digest);
        self.commits.retain(|_, c| c.digest() == digest);
        self.proposal = Some(proposal);
        self.phase = RoundPhase::AwaitingPrepareQuorum;
    }

    /// Adds a prepare. Returns false if the author already prepared.
    pub fn add_prepare(&mut self, prepare: Prepare) -> bool {
        if self.prepares.contains_key(&prepare.author) {
            return false;
        }
        self.prepares.insert(prepare.author, prepare);
        true
    }

    /// Adds a commit. Returns false if the author already committed.
    pub fn add_commit(&mut self, commit: Commit) -> bool {
        if self.commits.contains_key(&commit.author) {
            return false;
        }
        self.commits.insert(commit.author, commit);
        true
    }

    pub fn prepare_count(&self) -> usize {
        self.prepares.len()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.len()
    }

    /// Proposal accepted and a quorum of matching prepares collected.
    pub fn is_prepared(&self) -> bool {
        self.proposal.is_some() && self.prepares.len() >= self.quorum
    }

    /// Proposal accepted and a quorum of matching commits collected.
    pub fn is_committed(&self) -> bool {
        self.proposal.is_some() && self.commits.len() >= self.quorum
    }

    /// Builds the prepared certificate and returns it with its block.
    pub fn prepared_certificate(&self) -> Option<(PreparedCertificate, Block)> {
        if !self.is_prepared() {
            return None;
        }
        let proposal = self.proposal.as_ref()?;
        let certificate = PreparedCertificate {
            proposal: proposal.signed.clone(),
            prepares: self.prepares.values().cloned().collect(),
        };
        Some((certificate, proposal.block.clone()))
    }

    /// Commit seals of the collected commits.
    pub fn commit_seals(&self) -> Vec<(ValidatorId, Signature)> {
        self.commits
            .values()
            .map(|c| (c.author, c.commit_seal()))
            .collect()
    }
}
