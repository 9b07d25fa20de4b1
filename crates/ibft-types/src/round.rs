//! Consensus round identifiers.

use serde::{Deserialize, Serialize};

/// Identifies a single consensus round: the chain height being decided and
/// the round number within that height.
///
/// Ordering is lexicographic: first by height, then by round.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct RoundIdentifier {
    /// Chain height (block number) being decided.
    pub sequence: u64,

    /// Round number within the height, starting at 0.
    pub round: u32,
}

impl RoundIdentifier {
    /// Creates a new round identifier.
    pub const fn new(sequence: u64, round: u32) -> Self {
        Self { sequence, round }
    }

    /// Returns the identifier of the same height at another round.
    pub const fn with_round(&self, round: u32) -> Self {
        Self {
            sequence: self.sequence,
            round,
        }
    }

    /// Returns the identifier of the following round at the same height.
    pub fn next_round(&self) -> Self {
        self.with_round(self.round.saturating_add(1))
    }
}

impl std::fmt::Display for RoundIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.sequence, self.round)
    }
}
