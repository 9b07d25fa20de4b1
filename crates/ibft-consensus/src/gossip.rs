//! Broadcast with at-most-once delivery per message.

use crate::collaborators::ValidatorMulticaster;
use crate::message::{ConsensusMessage, MessageId};
use ibft_types::ValidatorId;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::trace;

/// Multicaster that refuses to send the same message twice.
///
/// Remembers the ids of the last `history_limit` messages it sent.
pub struct UniqueMessageMulticaster {
    inner: Arc<dyn ValidatorMulticaster>,
    history: LruCache<MessageId, ()>,
}

impl UniqueMessageMulticaster {
    /// Wraps a multicaster with a bounded send history.
    pub fn new(inner: Arc<dyn ValidatorMulticaster>, history_limit: usize) -> Self {
        let limit = NonZeroUsize::new(history_limit).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            history: LruCache::new(limit),
        }
    }

    /// Sends `message` to all validators except `denylist`.
    /// Returns false if it was already sent.
    pub fn send(&mut self, message: &ConsensusMessage, denylist: &[ValidatorId]) -> bool {
        let id = message.id();
        if self.history.contains(&id) {
            trace!(%id, kind = message.kind(), "already sent, skipping");
            return false;
        }
        self.history.put(id, ());
        self.inner.send(message.encode(), denylist);
        true
    }

    /// Returns true if `id` is in the send history.
    pub fn has_sent(&self, id: &MessageId) -> bool {
        self.history.contains(id)
    }
}

/// Sends local messages and relays received ones.
pub struct Gossiper {
    multicaster: UniqueMessageMulticaster,
}

impl Gossiper {
    /// Creates a gossiper over a unique multicaster.
    pub fn new(multicaster: UniqueMessageMulticaster) -> Self {
        Self { multicaster }
    }

    /// Broadcasts a locally created message.
    pub fn broadcast(&mut self, message: &ConsensusMessage) -> bool {
        self.multicaster.send(message, &[])
    }

    /// Relays a received message to everyone but its sender and author.
    pub fn relay(&mut self, message: &ConsensusMessage, sender: ValidatorId) -> bool {
        let author = message.author();
        self.multicaster.send(message, &[sender, author])
    }
}
