//! Consensus metrics.
//!
//! All handles are cheap clones sharing the same underlying series, so the
//! event queue, the processor and the state machine can each hold one.

use parking_lot::RwLock;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;

/// Labels for accepted messages.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct MessageLabels {
    /// Message kind (proposal, prepare, commit, round_change).
    pub kind: String,
}

/// Labels for rejected messages.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RejectLabels {
    /// Message kind, or "unknown" when the bytes did not decode.
    pub kind: String,
    /// Rejection reason.
    pub reason: String,
}

/// Consensus metrics container.
#[derive(Clone)]
pub struct ConsensusMetrics {
    /// Prometheus registry.
    pub registry: Arc<RwLock<Registry>>,
    /// Messages that passed validation.
    pub messages_accepted: Family<MessageLabels, Counter>,
    /// Messages dropped as invalid, malformed or duplicate.
    pub messages_rejected: Family<RejectLabels, Counter>,
    /// Round changes performed locally.
    pub round_changes: Counter,
    /// Events dropped because the queue was full.
    pub queue_overflow: Counter,
    /// Blocks appended to the chain by this node.
    pub blocks_finalized: Counter,
    /// Stall alarms raised.
    pub stall_alarms: Counter,
    /// Height currently being decided.
    pub current_height: Gauge,
    /// Round currently active.
    pub current_round: Gauge,
}

impl Default for ConsensusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsensusMetrics {
    /// Creates a metrics container with all series registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let messages_accepted = Family::<MessageLabels, Counter>::default();
        registry.register(
            "ibft_messages_accepted",
            "Consensus messages accepted",
            messages_accepted.clone(),
        );

        let messages_rejected = Family::<RejectLabels, Counter>::default();
        registry.register(
            "ibft_messages_rejected",
            "Consensus messages rejected by reason",
            messages_rejected.clone(),
        );

        let round_changes = Counter::default();
        registry.register(
            "ibft_round_changes",
            "Local round changes",
            round_changes.clone(),
        );

        let queue_overflow = Counter::default();
        registry.register(
            "ibft_queue_overflow",
            "Events dropped because the event queue was full",
            queue_overflow.clone(),
        );

        let blocks_finalized = Counter::default();
        registry.register(
            "ibft_blocks_finalized",
            "Blocks finalized by this node",
            blocks_finalized.clone(),
        );

        let stall_alarms = Counter::default();
        registry.register(
            "ibft_stall_alarms",
            "Stall alarms raised",
            stall_alarms.clone(),
        );

        let current_height = Gauge::default();
        registry.register(
            "ibft_current_height",
            "Height currently being decided",
            current_height.clone(),
        );

        let current_round = Gauge::default();
        registry.register(
            "ibft_current_round",
            "Round currently active",
            current_round.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            messages_accepted,
            messages_rejected,
            round_changes,
            queue_overflow,
            blocks_finalized,
            stall_alarms,
            current_height,
            current_round,
        }
    }

    /// Records an accepted message.
    pub fn record_accepted(&self, kind: &str) {
        self.messages_accepted
            .get_or_create(&MessageLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    /// Records a rejected message.
    pub fn record_rejected(&self, kind: &str, reason: &str) {
        self.messages_rejected
            .get_or_create(&RejectLabels {
                kind: kind.to_string(),
                reason: reason.to_string(),
            })
            .inc();
    }

    /// Returns the number of rejections recorded for a kind and reason.
    pub fn rejected_count(&self, kind: &str, reason: &str) -> u64 {
        self.messages_rejected
            .get_or_create(&RejectLabels {
                kind: kind.to_string(),
                reason: reason.to_string(),
            })
            .get()
    }

    /// Sets the height and round gauges.
    pub fn set_position(&self, height: u64, round: u32) {
        self.current_height.set(height as i64);
        self.current_round.set(i64::from(round));
    }

    /// Encodes all metrics in the Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        if encode(&mut buffer, &registry).is_err() {
            return String::new();
        }
        buffer
    }
}
