//! In-memory chain and a trivial block builder.

use ibft_consensus::{BlockCreator, ChainAppender, ConsensusError, ValidatorSet};
use ibft_types::{Block, BlockHeader, FinalizedBlock, RoundIdentifier, ValidatorId};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::info;

/// A chain kept in memory.
///
/// Every appended block must extend the head and carry commit seals from a
/// quorum of distinct validators.
pub struct InMemoryChain {
    genesis: Block,
    validators: ValidatorSet,
    blocks: RwLock<Vec<FinalizedBlock>>,
    head: watch::Sender<BlockHeader>,
}

impl InMemoryChain {
    /// Creates a chain holding only `genesis`.
    pub fn new(genesis: Block, validators: ValidatorSet) -> Self {
        let (head, _) = watch::channel(genesis.header.clone());
        Self {
            genesis,
            validators,
            blocks: RwLock::new(Vec::new()),
            head,
        }
    }

    /// The genesis block.
    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    /// Header of the latest block.
    pub fn head(&self) -> BlockHeader {
        self.head.borrow().clone()
    }

    /// Number of the latest block.
    pub fn height(&self) -> u64 {
        self.head.borrow().number
    }

    /// The finalized block with the given number.
    pub fn block(&self, number: u64) -> Option<FinalizedBlock> {
        let index = usize::try_from(number.checked_sub(1)?).ok()?;
        self.blocks.read().get(index).cloned()
    }

    /// All finalized blocks, oldest first.
    pub fn blocks(&self) -> Vec<FinalizedBlock> {
        self.blocks.read().clone()
    }

    /// Watches the chain head.
    pub fn subscribe(&self) -> watch::Receiver<BlockHeader> {
        self.head.subscribe()
    }

    /// Waits until the chain reaches `height`.
    pub async fn wait_for_height(&self, height: u64) {
        let mut head = self.subscribe();
        // The sender lives as long as the chain.
        let _ = head.wait_for(|header| header.number >= height).await;
    }

    fn check_seals(&self, finalized: &FinalizedBlock) -> Result<(), ConsensusError> {
        let sealers: BTreeSet<ValidatorId> = finalized
            .valid_sealers()
            .into_iter()
            .filter(|id| self.validators.contains(id))
            .collect();
        if !self.validators.has_quorum(&sealers) {
            return Err(ConsensusError::ChainAppend(format!(
                "block {} has {} valid seals, need {}",
                finalized.number(),
                sealers.len(),
                self.validators.quorum_size()
            )));
        }
        Ok(())
    }
}

impl ChainAppender for InMemoryChain {
    fn append_block(&self, finalized: &FinalizedBlock) -> Result<(), ConsensusError> {
        let mut blocks = self.blocks.write();
        let head = blocks
            .last()
            .map_or(&self.genesis.header, |b| &b.block.header);

        if finalized.number() != head.number + 1 {
            return Err(ConsensusError::ChainAppend(format!(
                "block {} does not follow head {}",
                finalized.number(),
                head.number
            )));
        }
        if finalized.block.parent() != head.digest() {
            return Err(ConsensusError::ChainAppend(
                "block does not extend the head".into(),
            ));
        }
        self.check_seals(finalized)?;

        blocks.push(finalized.clone());
        self.head.send_replace(finalized.block.header.clone());
        info!(
            height = finalized.number(),
            round = finalized.round,
            digest = %finalized.digest(),
            "block appended"
        );
        Ok(())
    }
}

/// Builds blocks whose body only names the height and round.
pub struct SimpleBlockBuilder {
    proposer: ValidatorId,
    block_period_seconds: u64,
}

impl SimpleBlockBuilder {
    /// Creates a builder signing headers as `proposer`.
    pub fn new(proposer: ValidatorId, block_period_seconds: u64) -> Self {
        Self {
            proposer,
            block_period_seconds,
        }
    }
}

impl BlockCreator for SimpleBlockBuilder {
    fn create_block(
        &self,
        parent: &BlockHeader,
        round: RoundIdentifier,
    ) -> Result<Block, ConsensusError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let timestamp = now.max(parent.timestamp + self.block_period_seconds);
        let body = format!("height={} round={}", round.sequence, round.round).into_bytes();
        Ok(Block::new(
            parent.number + 1,
            parent.digest(),
            self.proposer,
            timestamp,
            body,
        ))
    }
}
