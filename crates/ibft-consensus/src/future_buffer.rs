//! Buffer for messages addressed to heights not yet started.

use crate::message::ConsensusMessage;
use ibft_types::ValidatorId;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// A buffered message with the peer that delivered it.
#[derive(Debug, Clone)]
pub struct BufferedMessage {
    /// Delivering peer.
    pub sender: ValidatorId,
    /// The message.
    pub message: ConsensusMessage,
}

/// Bounded store of messages for future heights.
///
/// Only heights in `(current, current + max_distance]` are accepted. When
/// the buffer grows past its limit the highest buffered height loses a
/// message first, taken from the author holding the most messages at that
/// height, so one noisy author cannot push out everyone else.
pub struct FutureMessageBuffer {
    buffer: BTreeMap<u64, Vec<BufferedMessage>>,
    max_distance: u64,
    limit: usize,
    current_height: u64,
    len: usize,
}

impl FutureMessageBuffer {
    /// Creates an empty buffer.
    pub fn new(max_distance: u64, limit: usize, current_height: u64) -> Self {
        Self {
            buffer: BTreeMap::new(),
            max_distance,
            limit,
            current_height,
            len: 0,
        }
    }

    /// Returns true if a message for `height` would be accepted.
    pub fn accepts(&self, height: u64) -> bool {
        height > self.current_height
            && height <= self.current_height.saturating_add(self.max_distance)
    }

    /// Buffers a message for `height`. Returns `None` if the height is out
    /// of range, otherwise the messages evicted to stay within the limit
    /// (possibly including the new one).
    pub fn add(
        &mut self,
        height: u64,
        sender: ValidatorId,
        message: ConsensusMessage,
    ) -> Option<Vec<BufferedMessage>> {
        if !self.accepts(height) {
            return None;
        }
        self.buffer
            .entry(height)
            .or_default()
            .push(BufferedMessage { sender, message });
        self.len += 1;
        Some(self.evict())
    }

    fn evict(&mut self) -> Vec<BufferedMessage> {
        let mut evicted = Vec::new();
        while self.len > self.limit {
            let Some(mut entry) = self.buffer.last_entry() else {
                break;
            };
            let height = *entry.key();
            let messages = entry.get_mut();

            let mut counts: HashMap<ValidatorId, usize> = HashMap::new();
            for buffered in messages.iter() {
                *counts.entry(buffered.message.author()).or_default() += 1;
            }
            let noisiest = counts
                .into_iter()
                .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
                .map(|(author, _)| author);
            let index = messages
                .iter()
                .rposition(|m| Some(m.message.author()) == noisiest)
                .unwrap_or(messages.len() - 1);
            evicted.push(messages.remove(index));
            self.len -= 1;
            trace!(height, "evicted buffered future message");
            if messages.is_empty() {
                entry.remove();
            }
        }
        evicted
    }

    /// Moves the buffer to `height` and returns the messages stored for it.
    /// Messages for lower heights are discarded.
    pub fn retrieve_for_height(&mut self, height: u64) -> Vec<BufferedMessage> {
        self.current_height = height;
        let retained = self.buffer.split_off(&height.saturating_add(1));
        let stale = std::mem::replace(&mut self.buffer, retained);

        let mut ready = Vec::new();
        for (h, messages) in stale {
            self.len -= messages.len();
            if h == height {
                ready = messages;
            }
        }
        ready
    }

    /// Number of buffered messages.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
