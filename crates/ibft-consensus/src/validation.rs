//! Protocol legality checks for inbound messages.
//!
//! Every signed payload is checked in the same order: signature, validator
//! membership, height and round, then role and digest consistency. The
//! first failing check decides the rejection reason.

use crate::error::ValidationError;
use crate::message::{
    Commit, Payload, Prepare, PreparedCertificate, Proposal, RoundChange, RoundChangeCertificate,
    SignedPayload,
};
use crate::validator::ValidatorSet;
use ibft_types::{Block, BlockDigest, BlockHeader, RoundIdentifier, ValidatorId};
use std::collections::BTreeSet;

type Result<T> = std::result::Result<T, ValidationError>;

/// Validates messages for one height.
#[derive(Debug, Clone)]
pub struct MessageValidator {
    validators: ValidatorSet,
    parent: BlockHeader,
    parent_digest: BlockDigest,
}

impl MessageValidator {
    /// Creates a validator for the height following `parent`.
    pub fn new(validators: ValidatorSet, parent: BlockHeader) -> Self {
        let parent_digest = parent.digest();
        Self {
            validators,
            parent,
            parent_digest,
        }
    }

    /// Height being validated.
    pub fn height(&self) -> u64 {
        self.parent.number + 1
    }

    /// Validator set of the height.
    pub fn validators(&self) -> &ValidatorSet {
        &self.validators
    }

    /// Checks signature, membership and round of a signed payload.
    fn check_signed<P: Payload>(
        &self,
        signed: &SignedPayload<P>,
        expected: &RoundIdentifier,
    ) -> Result<()> {
        if !signed.verify_signature() {
            return Err(ValidationError::InvalidSignature(signed.author));
        }
        if !self.validators.contains(&signed.author) {
            return Err(ValidationError::NotValidator(signed.author));
        }
        let actual = signed.round();
        if actual != *expected {
            return Err(ValidationError::WrongRound {
                expected: *expected,
                actual,
            });
        }
        Ok(())
    }

    fn check_proposer(&self, author: ValidatorId, round: &RoundIdentifier) -> Result<()> {
        match self.validators.proposer_for(round) {
            Some(expected) if expected == author => Ok(()),
            Some(expected) => Err(ValidationError::WrongProposer {
                expected,
                actual: author,
            }),
            None => Err(ValidationError::NotValidator(author)),
        }
    }

    fn check_digest(expected: BlockDigest, actual: BlockDigest) -> Result<()> {
        if expected != actual {
            return Err(ValidationError::DigestMismatch { expected, actual });
        }
        Ok(())
    }

    /// Checks that `block` extends the parent of this height and hashes to `digest`.
    pub fn validate_block(&self, block: &Block, digest: BlockDigest) -> Result<()> {
        Self::check_digest(digest, block.digest())?;
        if block.number() != self.height() {
            return Err(ValidationError::InvalidBlock(format!(
                "block number {} at height {}",
                block.number(),
                self.height()
            )));
        }
        if block.parent() != self.parent_digest {
            return Err(ValidationError::InvalidBlock(
                "block does not extend the chain head".into(),
            ));
        }
        if !block.verify_body_root() {
            return Err(ValidationError::InvalidBlock("body root mismatch".into()));
        }
        Ok(())
    }

    /// Validates a proposal addressed to `round`.
    ///
    /// Proposals in round 0 must not carry a round change certificate; later
    /// rounds must carry a valid one for their round, and when that
    /// certificate holds a prepared certificate the proposal must re-propose
    /// its block.
    pub fn validate_proposal(&self, proposal: &Proposal, round: &RoundIdentifier) -> Result<()> {
        self.check_signed(&proposal.signed, round)?;
        self.check_proposer(proposal.author(), round)?;
        self.validate_block(&proposal.block, proposal.digest())?;

        let prepared = match (&proposal.round_change_certificate, round.round) {
            (None, 0) => None,
            (Some(_), 0) => {
                return Err(ValidationError::InvalidRoundChangeCertificate(
                    "round 0 proposal carries a certificate".into(),
                ))
            }
            (None, _) => {
                return Err(ValidationError::InvalidRoundChangeCertificate(
                    "missing certificate".into(),
                ))
            }
            (Some(certificate), _) => self.validate_round_change_certificate(certificate, round)?,
        };

        match prepared {
            Some(prepared) if prepared.digest() != proposal.digest() => {
                Err(ValidationError::InvalidRoundChangeCertificate(
                    "proposal does not re-propose the prepared block".into(),
                ))
            }
            // A re-proposed block keeps the header of its original proposer.
            Some(_) => Ok(()),
            None if proposal.block.header.proposer != proposal.author() => Err(
                ValidationError::InvalidBlock("block proposer differs from proposal author".into()),
            ),
            None => Ok(()),
        }
    }

    /// Validates a prepare. `accepted` is the digest of the round's proposal,
    /// if one has been accepted yet.
    pub fn validate_prepare(
        &self,
        prepare: &Prepare,
        round: &RoundIdentifier,
        accepted: Option<BlockDigest>,
    ) -> Result<()> {
        self.check_signed(prepare, round)?;
        if let Some(expected) = accepted {
            Self::check_digest(expected, prepare.digest())?;
        }
        Ok(())
    }

    /// Validates a commit, including its commit seal.
    pub fn validate_commit(
        &self,
        commit: &Commit,
        round: &RoundIdentifier,
        accepted: Option<BlockDigest>,
    ) -> Result<()> {
        self.check_signed(commit, round)?;
        if let Some(expected) = accepted {
            Self::check_digest(expected, commit.digest())?;
        }
        if !commit
            .author
            .verify(&commit.digest().commit_seal_data(), &commit.commit_seal())
        {
            return Err(ValidationError::InvalidCommitSeal(commit.author));
        }
        Ok(())
    }

    /// Validates a round change message for this height.
    ///
    /// The target round itself is not range checked here.
    pub fn validate_round_change(&self, round_change: &RoundChange) -> Result<()> {
        let target = RoundIdentifier::new(self.height(), round_change.round().round);
        self.check_signed(&round_change.signed, &target)?;

        match (round_change.prepared_certificate(), &round_change.prepared_block) {
            (None, _) => Ok(()),
            (Some(_), None) => Err(ValidationError::MalformedPreparedCertificate(
                "prepared block missing".into(),
            )),
            (Some(certificate), Some(block)) => {
                self.validate_prepared_certificate(certificate, &target)?;
                self.validate_block(block, certificate.digest())
                    .map_err(|e| ValidationError::MalformedPreparedCertificate(e.to_string()))
            }
        }
    }

    /// Validates a prepared certificate carried towards `target`.
    pub fn validate_prepared_certificate(
        &self,
        certificate: &PreparedCertificate,
        target: &RoundIdentifier,
    ) -> Result<()> {
        let malformed = |reason: String| ValidationError::MalformedPreparedCertificate(reason);
        let prepared_round = certificate.round();

        if prepared_round.sequence != self.height() || prepared_round > *target {
            return Err(malformed(format!(
                "prepared in {} for target {}",
                prepared_round, target
            )));
        }

        self.check_signed(&certificate.proposal, &prepared_round)
            .map_err(|e| malformed(format!("proposal: {}", e)))?;
        self.check_proposer(certificate.proposal.author, &prepared_round)
            .map_err(|e| malformed(format!("proposal: {}", e)))?;

        let mut authors = BTreeSet::new();
        for prepare in &certificate.prepares {
            self.validate_prepare(prepare, &prepared_round, Some(certificate.digest()))
                .map_err(|e| malformed(format!("prepare: {}", e)))?;
            authors.insert(prepare.author);
        }
        if authors.len() < self.validators.quorum_size() {
            return Err(malformed(format!(
                "{} distinct prepares, quorum is {}",
                authors.len(),
                self.validators.quorum_size()
            )));
        }
        Ok(())
    }

    /// Validates a round change certificate for `round` and returns the
    /// prepared certificate the proposer had to honour.
    pub fn validate_round_change_certificate<'a>(
        &self,
        certificate: &'a RoundChangeCertificate,
        round: &RoundIdentifier,
    ) -> Result<Option<&'a PreparedCertificate>> {
        let invalid = |reason: String| ValidationError::InvalidRoundChangeCertificate(reason);

        let mut authors = BTreeSet::new();
        for round_change in &certificate.round_changes {
            self.check_signed(round_change, round)
                .map_err(|e| invalid(e.to_string()))?;
            if let Some(prepared) = &round_change.payload.prepared_certificate {
                self.validate_prepared_certificate(prepared, round)
                    .map_err(|e| invalid(e.to_string()))?;
            }
            authors.insert(round_change.author);
        }
        if authors.len() < self.validators.quorum_size() {
            return Err(invalid(format!(
                "{} distinct round changes, quorum is {}",
                authors.len(),
                self.validators.quorum_size()
            )));
        }
        Ok(certificate.best_prepared_certificate())
    }
}
