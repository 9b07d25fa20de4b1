//! Runs the block builder off the processor task.

use crate::collaborators::BlockCreator;
use crate::event_queue::EventQueue;
use crate::events::ConsensusEvent;
use ibft_types::{BlockHeader, RoundIdentifier};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Requests blocks from a [`BlockCreator`] on the blocking pool and posts
/// them back as [`ConsensusEvent::BlockCreated`].
///
/// Only the latest request is live; an older request that completes after a
/// newer one was issued is not posted.
pub struct BlockCreationService {
    creator: Arc<dyn BlockCreator>,
    queue: EventQueue,
    pending: Option<(RoundIdentifier, JoinHandle<()>)>,
}

impl BlockCreationService {
    /// Creates the service.
    pub fn new(creator: Arc<dyn BlockCreator>, queue: EventQueue) -> Self {
        Self {
            creator,
            queue,
            pending: None,
        }
    }

    /// Requests a block on top of `parent` for `round`.
    pub fn request(&mut self, parent: BlockHeader, round: RoundIdentifier) {
        self.cancel();
        let creator = self.creator.clone();
        let queue = self.queue.clone();

        let handle = tokio::spawn(async move {
            let created =
                tokio::task::spawn_blocking(move || creator.create_block(&parent, round)).await;
            match created {
                Ok(Ok(block)) => {
                    debug!(%round, digest = %block.digest(), "block created");
                    queue.add(ConsensusEvent::BlockCreated { round, block });
                }
                Ok(Err(e)) => warn!(%round, error = %e, "block creation failed"),
                Err(e) => warn!(%round, error = %e, "block creation task failed"),
            }
        });
        self.pending = Some((round, handle));
    }

    /// Drops the outstanding request, if any.
    pub fn cancel(&mut self) {
        if let Some((round, handle)) = self.pending.take() {
            handle.abort();
            debug!(%round, "block request cancelled");
        }
    }

    /// Round of the outstanding request.
    pub fn pending_round(&self) -> Option<RoundIdentifier> {
        self.pending
            .as_ref()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(round, _)| *round)
    }
}

impl Drop for BlockCreationService {
    fn drop(&mut self) {
        self.cancel();
    }
}
