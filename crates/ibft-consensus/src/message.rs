//! Consensus message types exchanged between validators.
//!
//! Every message wraps a small signed payload. Blocks and round change
//! certificates travel next to the signed payload rather than inside it so
//! that certificates never nest: a prepared certificate holds the signed
//! proposal payload (round and digest only), not the proposal message.

use ibft_types::{Block, BlockDigest, RoundIdentifier, Signature, ValidatorId};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A payload that can be signed by a validator.
pub trait Payload: Serialize {
    /// Domain separation label prepended to the signing data.
    const LABEL: &'static [u8];

    /// The round the payload is addressed to.
    fn round(&self) -> RoundIdentifier;
}

/// Proposal payload: the proposer vouches for a block digest in a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalPayload {
    /// Round of the proposal.
    pub round: RoundIdentifier,
    /// Digest of the proposed block.
    pub digest: BlockDigest,
}

impl Payload for ProposalPayload {
    const LABEL: &'static [u8] = b"PROPOSAL:";

    fn round(&self) -> RoundIdentifier {
        self.round
    }
}

/// Prepare payload: "I have seen this valid proposal."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparePayload {
    /// Round of the prepare.
    pub round: RoundIdentifier,
    /// Digest of the proposed block.
    pub digest: BlockDigest,
}

impl Payload for PreparePayload {
    const LABEL: &'static [u8] = b"PREPARE:";

    fn round(&self) -> RoundIdentifier {
        self.round
    }
}

/// Commit payload, carrying the seal aggregated into the finalized block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitPayload {
    /// Round of the commit.
    pub round: RoundIdentifier,
    /// Digest of the committed block.
    pub digest: BlockDigest,
    /// Signature over [`BlockDigest::commit_seal_data`].
    pub commit_seal: Signature,
}

impl Payload for CommitPayload {
    const LABEL: &'static [u8] = b"COMMIT:";

    fn round(&self) -> RoundIdentifier {
        self.round
    }
}

/// Round change payload: a request to move to `round`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundChangePayload {
    /// Target round.
    pub round: RoundIdentifier,
    /// Proof that the author reached prepared in an earlier round.
    pub prepared_certificate: Option<PreparedCertificate>,
}

impl Payload for RoundChangePayload {
    const LABEL: &'static [u8] = b"ROUND_CHANGE:";

    fn round(&self) -> RoundIdentifier {
        self.round
    }
}

/// A payload together with its author and signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload<P> {
    /// The signed payload.
    pub payload: P,
    /// Claimed author.
    pub author: ValidatorId,
    /// Author's signature over [`SignedPayload::signing_data`].
    pub signature: Signature,
}

impl<P: Payload> SignedPayload<P> {
    /// Returns the bytes that are signed for `payload`.
    pub fn signing_data(payload: &P) -> Vec<u8> {
        let json = serde_json::to_vec(payload).expect("payload serialization should not fail");
        let mut data = Vec::with_capacity(P::LABEL.len() + json.len());
        data.extend_from_slice(P::LABEL);
        data.extend_from_slice(&json);
        data
    }

    /// Checks the signature against the claimed author.
    pub fn verify_signature(&self) -> bool {
        self.author
            .verify(&Self::signing_data(&self.payload), &self.signature)
    }

    /// Returns the round of the payload.
    pub fn round(&self) -> RoundIdentifier {
        self.payload.round()
    }
}

/// Signed prepare message.
pub type Prepare = SignedPayload<PreparePayload>;

/// Signed commit message.
pub type Commit = SignedPayload<CommitPayload>;

impl Prepare {
    /// Digest being prepared.
    pub fn digest(&self) -> BlockDigest {
        self.payload.digest
    }
}

impl Commit {
    /// Digest being committed.
    pub fn digest(&self) -> BlockDigest {
        self.payload.digest
    }

    /// The commit seal.
    pub fn commit_seal(&self) -> Signature {
        self.payload.commit_seal
    }
}

/// Proof that a block was prepared: its signed proposal plus a quorum of
/// matching prepares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedCertificate {
    /// Signed proposal payload.
    pub proposal: SignedPayload<ProposalPayload>,
    /// Matching prepares.
    pub prepares: Vec<Prepare>,
}

impl PreparedCertificate {
    /// Round in which the block was prepared.
    pub fn round(&self) -> RoundIdentifier {
        self.proposal.payload.round
    }

    /// Digest of the prepared block.
    pub fn digest(&self) -> BlockDigest {
        self.proposal.payload.digest
    }
}

/// Quorum of round change payloads justifying a proposal in round > 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundChangeCertificate {
    /// Signed round change payloads for the proposal's round.
    pub round_changes: Vec<SignedPayload<RoundChangePayload>>,
}

impl RoundChangeCertificate {
    /// Returns the prepared certificate the proposer must honour, if any.
    pub fn best_prepared_certificate(&self) -> Option<&PreparedCertificate> {
        best_prepared_certificate(
            self.round_changes
                .iter()
                .filter_map(|rc| rc.payload.prepared_certificate.as_ref()),
        )
    }
}

/// Picks the certificate with the highest round.
///
/// Certificates of equal round with different digests cannot both be valid
/// unless more than f validators are faulty; the lower digest is picked so
/// that every node still makes the same choice.
pub fn best_prepared_certificate<'a>(
    certificates: impl IntoIterator<Item = &'a PreparedCertificate>,
) -> Option<&'a PreparedCertificate> {
    certificates.into_iter().max_by(|a, b| {
        a.round()
            .cmp(&b.round())
            .then_with(|| b.digest().cmp(&a.digest()))
    })
}

/// A block proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Signed (round, digest) payload.
    pub signed: SignedPayload<ProposalPayload>,
    /// The proposed block; must hash to the signed digest.
    pub block: Block,
    /// Justification for proposals in round > 0.
    pub round_change_certificate: Option<RoundChangeCertificate>,
}

impl Proposal {
    /// Round of the proposal.
    pub fn round(&self) -> RoundIdentifier {
        self.signed.round()
    }

    /// Proposer.
    pub fn author(&self) -> ValidatorId {
        self.signed.author
    }

    /// Signed digest.
    pub fn digest(&self) -> BlockDigest {
        self.signed.payload.digest
    }
}

/// A round change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundChange {
    /// Signed payload.
    pub signed: SignedPayload<RoundChangePayload>,
    /// The block of the prepared certificate, when one is carried.
    pub prepared_block: Option<Block>,
}

impl RoundChange {
    /// Target round.
    pub fn round(&self) -> RoundIdentifier {
        self.signed.round()
    }

    /// Author.
    pub fn author(&self) -> ValidatorId {
        self.signed.author
    }

    /// The carried prepared certificate.
    pub fn prepared_certificate(&self) -> Option<&PreparedCertificate> {
        self.signed.payload.prepared_certificate.as_ref()
    }
}

/// Unique identity of a message (SHA-256 of its canonical encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; 32]);

impl MessageId {
    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Consensus message types exchanged between validators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    /// Block proposal from the round's proposer.
    Proposal(Proposal),
    /// Prepare vote.
    Prepare(Prepare),
    /// Commit vote.
    Commit(Commit),
    /// Round change request.
    RoundChange(RoundChange),
}

impl ConsensusMessage {
    /// Encodes the message to bytes.
    pub fn encode(&self) -> Bytes {
        let json = serde_json::to_vec(self).expect("message serialization should not fail");
        Bytes::from(json)
    }

    /// Decodes a message from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Returns the canonical identity of the message.
    pub fn id(&self) -> MessageId {
        MessageId(Sha256::digest(self.encode()).into())
    }

    /// Returns the message type as a string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ConsensusMessage::Proposal(_) => "proposal",
            ConsensusMessage::Prepare(_) => "prepare",
            ConsensusMessage::Commit(_) => "commit",
            ConsensusMessage::RoundChange(_) => "round_change",
        }
    }

    /// Round the message is addressed to.
    pub fn round(&self) -> RoundIdentifier {
        match self {
            ConsensusMessage::Proposal(m) => m.round(),
            ConsensusMessage::Prepare(m) => m.round(),
            ConsensusMessage::Commit(m) => m.round(),
            ConsensusMessage::RoundChange(m) => m.round(),
        }
    }

    /// Claimed author.
    pub fn author(&self) -> ValidatorId {
        match self {
            ConsensusMessage::Proposal(m) => m.author(),
            ConsensusMessage::Prepare(m) => m.author,
            ConsensusMessage::Commit(m) => m.author,
            ConsensusMessage::RoundChange(m) => m.author(),
        }
    }

    /// Checks the outer signature against the claimed author. Embedded
    /// certificates are not inspected.
    pub fn verify_signature(&self) -> bool {
        match self {
            ConsensusMessage::Proposal(m) => m.signed.verify_signature(),
            ConsensusMessage::Prepare(m) => m.verify_signature(),
            ConsensusMessage::Commit(m) => m.verify_signature(),
            ConsensusMessage::RoundChange(m) => m.signed.verify_signature(),
        }
    }
}
