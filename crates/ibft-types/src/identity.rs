//! Validator identities and Ed25519 signatures.
//!
//! Identities travel on the wire as raw public key bytes. Conversion into
//! commonware key types happens only when a signature has to be checked.

use crate::error::{Result, TypesError};
use crate::NAMESPACE;
use commonware_codec::DecodeExt;
use commonware_cryptography::{ed25519, PrivateKeyExt, Signer, Verifier};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A validator identity (raw Ed25519 public key bytes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ValidatorId([u8; 32]);

impl ValidatorId {
    /// Creates an identity from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses an identity from a hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str)?;
        let bytes: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| TypesError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        Ok(Self(bytes))
    }

    /// Verifies `signature` over `message` under the consensus namespace.
    ///
    /// Returns false for malformed keys as well as bad signatures.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(vk) = ed25519_consensus::VerificationKey::try_from(self.0) else {
            return false;
        };
        let public_key = ed25519::PublicKey::from(vk);
        let sig = ed25519::Signature::from(ed25519_consensus::Signature::from(signature.0));
        public_key.verify(Some(NAMESPACE), message, &sig)
    }
}

impl std::fmt::Display for ValidatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Debug for ValidatorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form keeps log lines readable.
        write!(f, "ValidatorId({})", &self.to_hex()[..8])
    }
}

/// An Ed25519 signature (64 bytes, hex encoded in serialized form).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature([u8; 64]);

impl Signature {
    /// Creates a signature from raw bytes.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Returns the hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a signature from a hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let mut bytes = [0u8; 64];
        hex::decode_to_slice(hex_str, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Signature({})", &self.to_hex()[..16])
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Signature::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Local validator key material.
#[derive(Clone)]
pub struct NodeKey {
    key: ed25519::PrivateKey,
    id: ValidatorId,
}

impl NodeKey {
    /// Derives a deterministic key from a seed (devnets and tests).
    pub fn from_seed(seed: u64) -> Self {
        Self::from_private_key(ed25519::PrivateKey::from_seed(seed))
    }

    /// Parses a hex-encoded 32 byte private key.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())?;
        if bytes.len() != 32 {
            return Err(TypesError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let key = ed25519::PrivateKey::decode(bytes.as_slice())
            .map_err(|e| TypesError::InvalidKey(e.to_string()))?;
        Ok(Self::from_private_key(key))
    }

    fn from_private_key(key: ed25519::PrivateKey) -> Self {
        let mut id = [0u8; 32];
        id.copy_from_slice(key.public_key().as_ref());
        Self {
            key,
            id: ValidatorId(id),
        }
    }

    /// Returns the identity of this key.
    pub fn id(&self) -> ValidatorId {
        self.id
    }

    /// Signs `message` under the consensus namespace.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.key.sign(Some(NAMESPACE), message);
        let mut bytes = [0u8; 64];
        bytes.copy_from_slice(sig.as_ref());
        Signature(bytes)
    }
}

impl std::fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKey").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = NodeKey::from_seed(7);
        let sig = key.sign(b"prepare");

        assert!(key.id().verify(b"prepare", &sig));
        assert!(!key.id().verify(b"commit", &sig));
        assert!(!NodeKey::from_seed(8).id().verify(b"prepare", &sig));
    }

    #[test]
    fn test_seeded_keys_are_deterministic() {
        assert_eq!(NodeKey::from_seed(1).id(), NodeKey::from_seed(1).id());
        assert_ne!(NodeKey::from_seed(1).id(), NodeKey::from_seed(2).id());
    }

    #[test]
    fn test_validator_id_hex() {
        let id = NodeKey::from_seed(3).id();
        let parsed = ValidatorId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, parsed);

        assert!(matches!(
            ValidatorId::from_hex("abcd"),
            Err(TypesError::InvalidLength { expected: 32, actual: 2 })
        ));
    }

    #[test]
    fn test_signature_serde() {
        let sig = NodeKey::from_seed(4).sign(b"x");
        let json = serde_json::to_string(&sig).unwrap();
        let parsed: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(sig, parsed);
    }

    #[test]
    fn test_node_key_from_hex_rejects_short_input() {
        assert!(matches!(
            NodeKey::from_hex("0011"),
            Err(TypesError::InvalidLength { .. })
        ));
    }
}
