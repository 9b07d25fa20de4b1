//! Stall detection.

use crate::metrics::ConsensusMetrics;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Raises an alarm when the chain height stops advancing.
///
/// The alarm fires once per stall and re-arms when the height moves.
pub struct StallMonitor {
    threshold: Duration,
    height: u64,
    last_progress: Instant,
    alarmed: bool,
    metrics: ConsensusMetrics,
}

impl StallMonitor {
    /// Creates a monitor that considers `height` current as of `now`.
    pub fn new(threshold: Duration, height: u64, now: Instant, metrics: ConsensusMetrics) -> Self {
        Self {
            threshold,
            height,
            last_progress: now,
            alarmed: false,
            metrics,
        }
    }

    /// Records the current height.
    pub fn observe(&mut self, height: u64, now: Instant) {
        if height > self.height {
            if self.alarmed {
                info!(height, "consensus progressing again");
            }
            self.height = height;
            self.last_progress = now;
            self.alarmed = false;
        }
    }

    /// Checks for a stall. Returns true when the alarm is raised.
    pub fn check(&mut self, now: Instant) -> bool {
        let stalled_for = now.saturating_duration_since(self.last_progress);
        if self.alarmed || stalled_for < self.threshold {
            return false;
        }
        self.alarmed = true;
        self.metrics.stall_alarms.inc();
        warn!(
            height = self.height,
            stalled_secs = stalled_for.as_secs(),
            "consensus stalled: no new height"
        );
        true
    }

    /// Returns true while an alarm is outstanding.
    pub fn is_alarmed(&self) -> bool {
        self.alarmed
    }
}
