//! Validator set management and proposer selection.
//!
//! Validators are the nodes that propose blocks and vote on them. Every
//! validator has equal weight; a quorum is `floor(2N/3) + 1` of them.

use ibft_types::{RoundIdentifier, ValidatorId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Returns the quorum size for `n` validators: `floor(2n/3) + 1`.
pub fn quorum_size(n: usize) -> usize {
    (2 * n) / 3 + 1
}

/// Returns the number of Byzantine validators tolerated among `n`:
/// `floor((n - 1) / 3)`.
pub fn fault_tolerance(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// The ordered validator set for a given height.
///
/// Validators are kept sorted by identity so every node derives the same
/// ordering, and therefore the same proposer, from the same membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    validators: Vec<ValidatorId>,
}

impl ValidatorSet {
    /// Creates a validator set, sorting and de-duplicating the identities.
    pub fn new(validators: impl IntoIterator<Item = ValidatorId>) -> Self {
        let unique: BTreeSet<_> = validators.into_iter().collect();
        Self {
            validators: unique.into_iter().collect(),
        }
    }

    /// Returns all validators in canonical order.
    pub fn validators(&self) -> &[ValidatorId] {
        &self.validators
    }

    /// Returns the number of validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Returns true if there are no validators.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Checks if an identity belongs to a validator.
    pub fn contains(&self, id: &ValidatorId) -> bool {
        self.validators.binary_search(id).is_ok()
    }

    /// Returns the quorum size for this set.
    pub fn quorum_size(&self) -> usize {
        quorum_size(self.len())
    }

    /// Returns the number of faulty validators this set tolerates.
    pub fn fault_tolerance(&self) -> usize {
        fault_tolerance(self.len())
    }

    /// Checks if a collection of distinct signers meets quorum.
    ///
    /// Non-members and repeated identities are not counted.
    pub fn has_quorum<'a>(&self, signers: impl IntoIterator<Item = &'a ValidatorId>) -> bool {
        let members: BTreeSet<_> = signers.into_iter().filter(|s| self.contains(s)).collect();
        members.len() >= self.quorum_size()
    }

    /// Selects the proposer for a round: `validators[(height + round) mod N]`.
    pub fn proposer_for(&self, round: &RoundIdentifier) -> Option<ValidatorId> {
        if self.validators.is_empty() {
            return None;
        }
        let n = self.validators.len() as u64;
        let idx = (round.sequence % n + u64::from(round.round) % n) % n;
        Some(self.validators[idx as usize])
    }

    /// Checks if `id` is the proposer for `round`.
    pub fn is_proposer(&self, id: &ValidatorId, round: &RoundIdentifier) -> bool {
        self.proposer_for(round).as_ref() == Some(id)
    }
}
