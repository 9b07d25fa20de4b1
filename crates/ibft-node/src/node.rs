//! A validator node: the consensus processor wired to an in-memory chain and
//! a [`LocalNetwork`] endpoint.

use crate::chain::{InMemoryChain, SimpleBlockBuilder};
use crate::error::{NodeError, Result};
use crate::network::LocalNetwork;
use ibft_consensus::statemachine::{FinalState, IbftController};
use ibft_consensus::{
    ConsensusEvent, ConsensusMetrics, EventQueue, Genesis, IbftProcessor, StaticValidatorProvider,
};
use ibft_types::{BlockHeader, NodeKey, ValidatorId};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};

/// A running validator.
pub struct ValidatorNode {
    id: ValidatorId,
    chain: Arc<InMemoryChain>,
    queue: EventQueue,
    metrics: ConsensusMetrics,
    network: LocalNetwork,
    shutdown: CancellationToken,
    processor: JoinHandle<ibft_consensus::Result<()>>,
    head_follower: JoinHandle<()>,
}

impl ValidatorNode {
    /// Starts a validator on `network`. Must be called within a tokio runtime.
    pub fn spawn(key: NodeKey, genesis: &Genesis, network: &LocalNetwork) -> Result<Self> {
        let id = key.id();
        let validators = genesis.validator_set()?;
        if !validators.contains(&id) {
            return Err(NodeError::NotInGenesis(id));
        }
        let config = genesis.ibft.clone();
        let genesis_block = genesis.block();

        let metrics = ConsensusMetrics::new();
        let (queue, events) = EventQueue::new(config.message_queue_limit);
        let queue = queue.with_metrics(metrics.clone());
        let chain = Arc::new(InMemoryChain::new(genesis_block.clone(), validators.clone()));
        network.register(id, queue.clone());

        let final_state = FinalState::new(
            config.clone(),
            Arc::new(key),
            Arc::new(network.endpoint(id)),
            Arc::new(SimpleBlockBuilder::new(id, config.block_period_seconds)),
            chain.clone(),
            Arc::new(StaticValidatorProvider::new(validators)),
            queue.clone(),
            metrics.clone(),
        );
        let controller = IbftController::new(final_state, genesis_block.header);
        let shutdown = CancellationToken::new();
        let mut processor = IbftProcessor::new(controller, events, shutdown.clone());

        let span = tracing::info_span!("validator", %id);
        let processor = tokio::spawn(
            async move {
                let result = processor.run().await;
                if let Err(e) = &result {
                    error!(error = %e, "consensus halted");
                }
                result
            }
            .instrument(span),
        );
        let head_follower = tokio::spawn(follow_chain_head(
            chain.subscribe(),
            queue.clone(),
            shutdown.clone(),
        ));

        info!(%id, "validator started");
        Ok(Self {
            id,
            chain,
            queue,
            metrics,
            network: network.clone(),
            shutdown,
            processor,
            head_follower,
        })
    }

    /// Identity of the node.
    pub fn id(&self) -> ValidatorId {
        self.id
    }

    /// The node's chain.
    pub fn chain(&self) -> &Arc<InMemoryChain> {
        &self.chain
    }

    /// Number of the node's latest block.
    pub fn height(&self) -> u64 {
        self.chain.height()
    }

    /// The node's event queue.
    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Consensus metrics of the node.
    pub fn metrics(&self) -> &ConsensusMetrics {
        &self.metrics
    }

    /// Returns true once the processor task has exited.
    pub fn is_finished(&self) -> bool {
        self.processor.is_finished()
    }

    /// Disconnects the node and stops its processor.
    pub async fn stop(self) -> Result<()> {
        self.network.unregister(&self.id);
        self.shutdown.cancel();
        self.head_follower.abort();
        let result = self.processor.await?;
        info!(id = %self.id, height = self.chain.height(), "validator stopped");
        Ok(result?)
    }
}

/// Posts every new chain head to the consensus queue.
async fn follow_chain_head(
    mut head: watch::Receiver<BlockHeader>,
    queue: EventQueue,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            changed = head.changed() => {
                if changed.is_err() {
                    return;
                }
                let header = head.borrow_and_update().clone();
                queue.add(ConsensusEvent::NewChainHead(header));
            }
        }
    }
}
