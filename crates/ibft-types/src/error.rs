//! Errors for parsing identities and key material.

use thiserror::Error;

/// Errors that can occur when decoding types from external representations.
#[derive(Debug, Error)]
pub enum TypesError {
    /// The input was not valid hex.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// The input had the wrong length.
    #[error("invalid length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Expected byte length.
        expected: usize,
        /// Actual byte length.
        actual: usize,
    },

    /// The bytes do not form a valid key.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// A specialized Result type for type conversions.
pub type Result<T> = std::result::Result<T, TypesError>;
