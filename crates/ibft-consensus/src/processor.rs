//! The consensus event loop.

use crate::error::{ConsensusError, Result};
use crate::event_queue::EventReceiver;
use crate::events::ConsensusEvent;
use crate::liveness::StallMonitor;
use crate::statemachine::IbftController;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drains the event queue into the controller, one event at a time.
///
/// All consensus state lives on the task running [`IbftProcessor::run`];
/// timers, the block builder and the network only ever post events.
pub struct IbftProcessor {
    controller: IbftController,
    events: EventReceiver,
    stall: StallMonitor,
    stall_check_period: Duration,
    shutdown: CancellationToken,
}

impl IbftProcessor {
    /// Creates a processor. Nothing runs until [`IbftProcessor::run`].
    pub fn new(
        controller: IbftController,
        events: EventReceiver,
        shutdown: CancellationToken,
    ) -> Self {
        let config = &controller.final_state().config;
        let stall = StallMonitor::new(
            config.stall_threshold(),
            controller.chain_height(),
            Instant::now(),
            controller.final_state().metrics.clone(),
        );
        let stall_check_period = config.block_period().max(Duration::from_secs(1));
        Self {
            controller,
            events,
            stall,
            stall_check_period,
            shutdown,
        }
    }

    /// The controller.
    pub fn controller(&self) -> &IbftController {
        &self.controller
    }

    /// Starts the first height and processes events until shutdown.
    ///
    /// Returns an error only when consensus cannot continue: the signing
    /// key is unusable or the event queue is gone.
    pub async fn run(&mut self) -> Result<()> {
        self.controller.start()?;
        self.stall
            .observe(self.controller.chain_height(), Instant::now());
        info!(height = self.controller.chain_height(), "consensus processor started");

        let mut stall_check = tokio::time::interval(self.stall_check_period);
        stall_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!(height = self.controller.chain_height(), "consensus processor stopping");
                    return Ok(());
                }

                event = self.events.recv() => {
                    let Some(event) = event else {
                        error!("event queue closed");
                        return Err(ConsensusError::QueueClosed);
                    };
                    self.process(event)?;
                }

                _ = stall_check.tick() => {
                    self.stall.check(Instant::now());
                }
            }
        }
    }

    fn process(&mut self, event: ConsensusEvent) -> Result<()> {
        let kind = event.kind();
        debug!(kind, "processing event");
        match self.controller.handle_event(event) {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                error!(kind, error = %e, "fatal consensus error");
                return Err(e);
            }
            Err(e) => warn!(kind, error = %e, "failed to handle event"),
        }
        self.stall
            .observe(self.controller.chain_height(), Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        BlockCreator, ChainAppender, MessageSigner, StaticValidatorProvider, ValidatorMulticaster,
    };
    use crate::config::IbftConfig;
    use crate::event_queue::EventQueue;
    use crate::metrics::ConsensusMetrics;
    use crate::statemachine::FinalState;
    use crate::validator::ValidatorSet;
    use bytes::Bytes;
    use ibft_types::{
        Block, BlockDigest, BlockHeader, FinalizedBlock, NodeKey, RoundIdentifier, Signature,
        ValidatorId,
    };
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Silent;

    impl ValidatorMulticaster for Silent {
        fn send(&self, _data: Bytes, _denylist: &[ValidatorId]) {}
    }

    #[derive(Default)]
    struct Chain {
        blocks: Mutex<Vec<FinalizedBlock>>,
    }

    impl ChainAppender for Chain {
        fn append_block(&self, block: &FinalizedBlock) -> Result<()> {
            self.blocks.lock().push(block.clone());
            Ok(())
        }
    }

    struct EmptyBlocks(ValidatorId);

    impl BlockCreator for EmptyBlocks {
        fn create_block(&self, parent: &BlockHeader, _round: RoundIdentifier) -> Result<Block> {
            Ok(Block::new(
                parent.number + 1,
                parent.digest(),
                self.0,
                parent.timestamp + 1,
                vec![],
            ))
        }
    }

    struct BrokenSigner(ValidatorId);

    impl MessageSigner for BrokenSigner {
        fn id(&self) -> ValidatorId {
            self.0
        }

        fn sign(&self, _data: &[u8]) -> Result<Signature> {
            Err(ConsensusError::SigningUnavailable("key locked".into()))
        }
    }

    /// A lone validator: every quorum is itself.
    fn solo(signer: Arc<dyn MessageSigner>) -> (IbftProcessor, Arc<Chain>, CancellationToken) {
        let id = signer.id();
        let metrics = ConsensusMetrics::new();
        let (queue, events) = EventQueue::new(64);
        let chain = Arc::new(Chain::default());
        let final_state = FinalState::new(
            IbftConfig::default(),
            signer,
            Arc::new(Silent),
            Arc::new(EmptyBlocks(id)),
            chain.clone(),
            Arc::new(StaticValidatorProvider::new(ValidatorSet::new([id]))),
            queue.with_metrics(metrics.clone()),
            metrics,
        );
        let genesis = Block::new(0, BlockDigest::GENESIS_PARENT, id, 0, vec![]).header;
        let controller = IbftController::new(final_state, genesis);
        let shutdown = CancellationToken::new();
        (
            IbftProcessor::new(controller, events, shutdown.clone()),
            chain,
            shutdown,
        )
    }

    #[tokio::test]
    async fn test_single_validator_finalizes_until_shutdown() {
        let (mut processor, chain, shutdown) = solo(Arc::new(NodeKey::from_seed(1)));
        let handle = tokio::spawn(async move {
            let result = processor.run().await;
            (processor, result)
        });

        tokio::time::timeout(Duration::from_secs(10), async {
            while chain.blocks.lock().len() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        let (processor, result) = handle.await.unwrap();
        result.unwrap();

        let blocks = chain.blocks.lock().clone();
        for (i, block) in blocks.iter().enumerate() {
            assert_eq!(block.number(), i as u64 + 1);
            assert_eq!(block.seal_count(), 1);
        }
        assert!(processor.controller().chain_height() > 3);
    }

    #[tokio::test]
    async fn test_unusable_key_stops_the_processor() {
        let id = NodeKey::from_seed(1).id();
        let (mut processor, chain, _shutdown) = solo(Arc::new(BrokenSigner(id)));

        let result = tokio::time::timeout(Duration::from_secs(10), processor.run())
            .await
            .unwrap();
        assert!(matches!(result, Err(ConsensusError::SigningUnavailable(_))));
        assert!(chain.blocks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_before_any_event() {
        let (mut processor, _chain, shutdown) = solo(Arc::new(NodeKey::from_seed(1)));
        shutdown.cancel();
        processor.run().await.unwrap();
        assert_eq!(processor.controller().chain_height(), 1);
    }
}
