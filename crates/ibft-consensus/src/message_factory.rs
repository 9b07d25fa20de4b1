//! Construction of locally signed messages.

use crate::collaborators::MessageSigner;
use crate::error::Result;
use crate::message::{
    Commit, CommitPayload, Payload, Prepare, PreparePayload, PreparedCertificate, Proposal,
    ProposalPayload, RoundChange, RoundChangeCertificate, RoundChangePayload, SignedPayload,
};
use ibft_types::{Block, BlockDigest, RoundIdentifier, ValidatorId};
use std::sync::Arc;

/// Builds messages signed by the local node.
#[derive(Clone)]
pub struct MessageFactory {
    signer: Arc<dyn MessageSigner>,
}

impl MessageFactory {
    /// Creates a factory around a signer.
    pub fn new(signer: Arc<dyn MessageSigner>) -> Self {
        Self { signer }
    }

    /// Identity of the local node.
    pub fn local_id(&self) -> ValidatorId {
        self.signer.id()
    }

    fn sign<P: Payload>(&self, payload: P) -> Result<SignedPayload<P>> {
        let signature = self.signer.sign(&SignedPayload::signing_data(&payload))?;
        Ok(SignedPayload {
            payload,
            author: self.signer.id(),
            signature,
        })
    }

    /// Creates a proposal for `block`.
    pub fn create_proposal(
        &self,
        round: RoundIdentifier,
        block: Block,
        round_change_certificate: Option<RoundChangeCertificate>,
    ) -> Result<Proposal> {
        let signed = self.sign(ProposalPayload {
            round,
            digest: block.digest(),
        })?;
        Ok(Proposal {
            signed,
            block,
            round_change_certificate,
        })
    }

    /// Creates a prepare for `digest`.
    pub fn create_prepare(&self, round: RoundIdentifier, digest: BlockDigest) -> Result<Prepare> {
        self.sign(PreparePayload { round, digest })
    }

    /// Creates a commit for `digest`, including the commit seal.
    pub fn create_commit(&self, round: RoundIdentifier, digest: BlockDigest) -> Result<Commit> {
        let commit_seal = self.signer.sign(&digest.commit_seal_data())?;
        self.sign(CommitPayload {
            round,
            digest,
            commit_seal,
        })
    }

    /// Creates a round change to `round`, carrying the latest prepared
    /// certificate and its block.
    pub fn create_round_change(
        &self,
        round: RoundIdentifier,
        prepared: Option<(PreparedCertificate, Block)>,
    ) -> Result<RoundChange> {
        let (prepared_certificate, prepared_block) = match prepared {
            Some((certificate, block)) => (Some(certificate), Some(block)),
            None => (None, None),
        };
        let signed = self.sign(RoundChangePayload {
            round,
            prepared_certificate,
        })?;
        Ok(RoundChange {
            signed,
            prepared_block,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibft_types::NodeKey;

    fn factory(seed: u64) -> MessageFactory {
        MessageFactory::new(Arc::new(NodeKey::from_seed(seed)))
    }

    #[test]
    fn test_created_messages_verify() {
        let factory = factory(3);
        let round = RoundIdentifier::new(4, 0);
        let block = Block::new(4, BlockDigest::GENESIS_PARENT, factory.local_id(), 1, vec![1]);

        let proposal = factory.create_proposal(round, block.clone(), None).unwrap();
        assert!(proposal.signed.verify_signature());
        assert_eq!(proposal.digest(), block.digest());

        let prepare = factory.create_prepare(round, block.digest()).unwrap();
        assert!(prepare.verify_signature());

        let round_change = factory
            .create_round_change(round.next_round(), None)
            .unwrap();
        assert!(round_change.signed.verify_signature());
        assert!(round_change.prepared_block.is_none());
    }

    #[test]
    fn test_commit_seal_signs_digest() {
        let factory = factory(5);
        let digest = BlockDigest::from_bytes([3; 32]);
        let commit = factory
            .create_commit(RoundIdentifier::new(1, 2), digest)
            .unwrap();

        assert!(commit.verify_signature());
        assert!(factory
            .local_id()
            .verify(&digest.commit_seal_data(), &commit.commit_seal()));
    }

    struct BrokenSigner;

    impl MessageSigner for BrokenSigner {
        fn id(&self) -> ValidatorId {
            ValidatorId::from_bytes([0; 32])
        }

        fn sign(&self, _data: &[u8]) -> Result<ibft_types::Signature> {
            Err(crate::ConsensusError::SigningUnavailable("key locked".into()))
        }
    }

    #[test]
    fn test_signer_failure_is_fatal() {
        let factory = MessageFactory::new(Arc::new(BrokenSigner));
        let err = factory
            .create_prepare(RoundIdentifier::new(1, 0), BlockDigest::GENESIS_PARENT)
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
