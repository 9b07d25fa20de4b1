//! Bounded record of already-processed messages.

use crate::message::MessageId;
use lru::LruCache;
use std::num::NonZeroUsize;

/// Remembers the ids of the most recently processed messages.
pub struct MessageTracker {
    seen: LruCache<MessageId, ()>,
}

impl MessageTracker {
    /// Creates a tracker remembering `limit` message ids.
    pub fn new(limit: usize) -> Self {
        let limit = NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN);
        Self {
            seen: LruCache::new(limit),
        }
    }

    /// Records `id`. Returns false if it had already been seen.
    pub fn add_seen(&mut self, id: MessageId) -> bool {
        self.seen.put(id, ()).is_none()
    }

    /// Returns true if `id` was processed recently.
    pub fn has_seen(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    /// Removes `id`, so that the message is processed again if redelivered.
    pub fn forget(&mut self, id: &MessageId) {
        self.seen.pop(id);
    }
}
