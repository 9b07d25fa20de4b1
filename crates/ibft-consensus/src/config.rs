//! Consensus engine configuration.

use crate::error::{ConsensusError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of the IBFT engine, consumed at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IbftConfig {
    /// Minimum seconds between a parent block and its child.
    pub block_period_seconds: u64,

    /// Round 0 timeout in seconds; doubles with every round.
    pub request_timeout_seconds: u64,

    /// Capacity of the inbound event queue.
    pub message_queue_limit: usize,

    /// Number of message ids remembered by the unique multicaster.
    pub gossiped_history_limit: usize,

    /// Number of processed message ids remembered for duplicate detection.
    pub duplicate_message_limit: usize,

    /// Maximum number of buffered messages for future heights.
    pub future_messages_limit: usize,

    /// How far ahead (in heights, and in rounds within a height) messages are buffered.
    pub future_messages_max_distance: u64,

    /// Multiples of the expected block interval without progress before the
    /// stall alarm fires.
    pub stall_alarm_multiplier: u32,
}

impl Default for IbftConfig {
    fn default() -> Self {
        Self {
            block_period_seconds: 1,
            request_timeout_seconds: 4,
            message_queue_limit: 1000,
            gossiped_history_limit: 1000,
            duplicate_message_limit: 100,
            future_messages_limit: 1000,
            future_messages_max_distance: 10,
            stall_alarm_multiplier: 5,
        }
    }
}

impl IbftConfig {
    /// Returns the block period.
    pub fn block_period(&self) -> Duration {
        Duration::from_secs(self.block_period_seconds)
    }

    /// Returns the round 0 timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Returns how long the chain may go without a new height before the
    /// stall alarm is raised.
    pub fn stall_threshold(&self) -> Duration {
        (self.block_period() + self.request_timeout()) * self.stall_alarm_multiplier
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_seconds == 0 {
            return Err(ConsensusError::InvalidConfig(
                "request_timeout_seconds must be positive".into(),
            ));
        }
        if self.message_queue_limit == 0 {
            return Err(ConsensusError::InvalidConfig(
                "message_queue_limit must be positive".into(),
            ));
        }
        if self.gossiped_history_limit == 0 || self.duplicate_message_limit == 0 {
            return Err(ConsensusError::InvalidConfig(
                "history limits must be positive".into(),
            ));
        }
        if self.stall_alarm_multiplier == 0 {
            return Err(ConsensusError::InvalidConfig(
                "stall_alarm_multiplier must be positive".into(),
            ));
        }
        Ok(())
    }
}
