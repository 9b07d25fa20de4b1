//! A local devnet: several validators in one process on a [`LocalNetwork`].

use crate::error::{NodeError, Result};
use crate::network::LocalNetwork;
use crate::node::ValidatorNode;
use ibft_consensus::{generate_devnet_genesis, Genesis, IbftConfig};
use ibft_types::{BlockDigest, NodeKey, ValidatorId};
use std::time::Duration;
use tracing::{info, warn};

/// Validators of one genesis sharing a [`LocalNetwork`].
pub struct Devnet {
    genesis: Genesis,
    network: LocalNetwork,
    nodes: Vec<ValidatorNode>,
}

impl Devnet {
    /// Creates a devnet with no running nodes.
    pub fn new(genesis: Genesis) -> Self {
        Self {
            genesis,
            network: LocalNetwork::new(),
            nodes: Vec::new(),
        }
    }

    /// Starts `count` validators with seeds `0..count` and the given engine
    /// parameters.
    pub fn start_local(count: usize, config: IbftConfig) -> Result<Self> {
        let genesis = generate_devnet_genesis(count, 0).with_config(config);
        genesis.validate()?;
        let mut devnet = Self::new(genesis);
        for seed in 0..count as u64 {
            devnet.spawn(NodeKey::from_seed(seed))?;
        }
        Ok(devnet)
    }

    /// The genesis shared by every node.
    pub fn genesis(&self) -> &Genesis {
        &self.genesis
    }

    /// The shared transport.
    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    /// Running nodes.
    pub fn nodes(&self) -> &[ValidatorNode] {
        &self.nodes
    }

    /// The running node with identity `id`.
    pub fn node(&self, id: &ValidatorId) -> Option<&ValidatorNode> {
        self.nodes.iter().find(|n| n.id() == *id)
    }

    /// Starts a validator holding `key`.
    pub fn spawn(&mut self, key: NodeKey) -> Result<ValidatorId> {
        let node = ValidatorNode::spawn(key, &self.genesis, &self.network)?;
        let id = node.id();
        self.nodes.push(node);
        Ok(id)
    }

    /// Stops a validator, as if it crashed.
    pub async fn stop(&mut self, id: &ValidatorId) -> Result<()> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.id() == *id)
            .ok_or(NodeError::UnknownNode(*id))?;
        self.nodes.remove(index).stop().await
    }

    /// Lowest chain height among running nodes.
    pub fn min_height(&self) -> u64 {
        self.nodes.iter().map(|n| n.height()).min().unwrap_or(0)
    }

    /// Waits until every running node has reached `height`.
    pub async fn wait_for_height(&self, height: u64, timeout: Duration) -> Result<()> {
        let all = async {
            for node in &self.nodes {
                node.chain().wait_for_height(height).await;
            }
        };
        tokio::time::timeout(timeout, all)
            .await
            .map_err(|_| NodeError::Timeout { height })
    }

    /// Returns the heights at which two running nodes finalized different
    /// blocks.
    pub fn conflicting_heights(&self) -> Vec<u64> {
        let max = self.nodes.iter().map(|n| n.height()).max().unwrap_or(0);
        (1..=max)
            .filter(|height| {
                let digests: Vec<BlockDigest> = self
                    .nodes
                    .iter()
                    .filter_map(|n| n.chain().block(*height))
                    .map(|b| b.digest())
                    .collect();
                digests.windows(2).any(|pair| pair[0] != pair[1])
            })
            .collect()
    }

    /// Stops every node.
    pub async fn shutdown(self) -> Result<()> {
        info!(height = self.min_height(), "stopping devnet");
        let mut first_error = None;
        for node in self.nodes {
            let id = node.id();
            if let Err(e) = node.stop().await {
                warn!(%id, error = %e, "validator stopped with error");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
