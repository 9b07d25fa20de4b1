//! Accumulation of round change messages for one height.

use crate::message::{best_prepared_certificate, PreparedCertificate, RoundChange, RoundChangeCertificate};
use ibft_types::{Block, RoundIdentifier, ValidatorId};
use std::collections::BTreeMap;

/// What a quorum of round changes for a round yields.
#[derive(Debug, Clone)]
pub struct RoundChangeArtifacts {
    /// Target round.
    pub round: RoundIdentifier,
    /// The round changes, as a certificate for the next proposal.
    pub certificate: RoundChangeCertificate,
    /// Highest prepared certificate carried, with its block.
    pub prepared: Option<(PreparedCertificate, Block)>,
}

#[derive(Default)]
struct RoundChangeCollector {
    messages: BTreeMap<ValidatorId, RoundChange>,
    actioned: bool,
}

/// Collects validated round changes keyed by target round.
pub struct RoundChangeManager {
    quorum: usize,
    collectors: BTreeMap<u32, RoundChangeCollector>,
}

impl RoundChangeManager {
    /// Creates a manager for a validator set with the given quorum.
    pub fn new(quorum: usize) -> Self {
        Self {
            quorum,
            collectors: BTreeMap::new(),
        }
    }

    /// Records a round change. Returns the artifacts the first time the
    /// target round reaches quorum.
    pub fn append(&mut self, round_change: RoundChange) -> Option<RoundChangeArtifacts> {
        let round = round_change.round();
        let collector = self.collectors.entry(round.round).or_default();
        if collector.messages.contains_key(&round_change.author()) {
            return None;
        }
        collector
            .messages
            .insert(round_change.author(), round_change);

        if collector.actioned || collector.messages.len() < self.quorum {
            return None;
        }
        collector.actioned = true;

        let certificate = RoundChangeCertificate {
            round_changes: collector
                .messages
                .values()
                .map(|rc| rc.signed.clone())
                .collect(),
        };
        let prepared = best_prepared_certificate(
            collector
                .messages
                .values()
                .filter_map(RoundChange::prepared_certificate),
        )
        .and_then(|best| {
            collector.messages.values().find_map(|rc| {
                let carried = rc.prepared_certificate()?;
                if carried.round() == best.round() && carried.digest() == best.digest() {
                    rc.prepared_block.clone().map(|block| (carried.clone(), block))
                } else {
                    None
                }
            })
        });

        Some(RoundChangeArtifacts {
            round,
            certificate,
            prepared,
        })
    }

    /// Drops collectors for rounds below `round`.
    pub fn discard_rounds_below(&mut self, round: u32) {
        self.collectors = self.collectors.split_off(&round);
    }

    /// Number of distinct authors that asked for `round`.
    pub fn count(&self, round: u32) -> usize {
        self.collectors
            .get(&round)
            .map_or(0, |c| c.messages.len())
    }
}
