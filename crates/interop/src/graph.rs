//! The `graph` module tracks which blocks depend on which, across every chain of the dependency
//! set, and cascades invalidations along those dependencies.

use crate::{
    inbox::parse_transaction, BlockKey, BlockRef, ExecutingMessage, MessageVerifier, SafetyLabel,
};
use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, Transaction, H256, U256};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use thiserror::Error;
use tokio::sync::Mutex;

/// A source of the transactions of a chain's blocks.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn block_transactions(&self, block: &BlockRef) -> Result<Vec<Transaction>>;
}

/// Errors returned by the [DependencyGraph].
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("block {got:?} does not extend head {head:?} of chain {chain}")]
    HeadMismatch { chain: U256, head: H256, got: H256 },
    #[error("chain {0} is not in the dependency set")]
    UnknownChain(U256),
    #[error("failed to fetch transactions of block {0:?}")]
    Fetch(H256, #[source] anyhow::Error),
}

/// An outgoing edge of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dependency {
    Parent(BlockKey),
    /// The block at a height on a peer chain, which contains an initiating message.
    Message { chain: U256, number: u64 },
}

#[derive(Debug)]
struct Node {
    block: BlockRef,
    dependencies: Vec<Dependency>,
    unverified: Vec<ExecutingMessage>,
    /// Set once the block and everything it depends on are known to be cross-unsafe. Only an
    /// invalidation, which drops the node, can revoke it.
    cross_unsafe: bool,
}

#[derive(Debug, Default)]
struct GraphState {
    heads: HashMap<U256, H256>,
    blocks: HashMap<BlockKey, Node>,
    by_number: HashMap<(U256, u64), H256>,
    /// Blocks depending on the block at a given height of a chain.
    dependents: HashMap<(U256, u64), HashSet<BlockKey>>,
    /// The highest pruned height of each chain. Heights at or below it are finalized.
    pruned: HashMap<U256, u64>,
}

impl GraphState {
    fn dependency_key(&self, dependency: &Dependency) -> Option<BlockKey> {
        match *dependency {
            Dependency::Parent(key) => Some(key),
            Dependency::Message { chain, number } => self
                .by_number
                .get(&(chain, number))
                .map(|&hash| BlockKey { chain, hash }),
        }
    }

    /// Returns `true` if the block at `number` of `chain` is tracked or was pruned as finalized.
    fn observed(&self, chain: U256, number: u64) -> bool {
        self.by_number.contains_key(&(chain, number)) || self.is_pruned(chain, number)
    }

    fn is_pruned(&self, chain: U256, number: u64) -> bool {
        self.pruned.get(&chain).is_some_and(|&floor| number <= floor)
    }

    fn edge_target(dependency: &Dependency, block: &BlockRef, chain: U256) -> (U256, u64) {
        match *dependency {
            Dependency::Parent(_) => (chain, block.number.saturating_sub(1)),
            Dependency::Message { chain, number } => (chain, number),
        }
    }

    /// Drops `block` and, before it, every block depending on its height.
    fn invalidate(&mut self, chain: U256, block: &BlockRef) {
        let key = BlockKey {
            chain,
            hash: block.hash,
        };
        if !self.blocks.contains_key(&key) {
            return;
        }

        let dependents = self
            .dependents
            .remove(&(chain, block.number))
            .unwrap_or_default();
        for dependent in dependents {
            if let Some(node) = self.blocks.get(&dependent) {
                let dependent_block = node.block;
                self.invalidate(dependent.chain, &dependent_block);
            }
        }

        if let Some(node) = self.blocks.remove(&key) {
            for dependency in &node.dependencies {
                let target = Self::edge_target(dependency, &node.block, chain);
                if let Some(set) = self.dependents.get_mut(&target) {
                    set.remove(&key);
                    if set.is_empty() {
                        self.dependents.remove(&target);
                    }
                }
            }
        }
        if self.by_number.get(&(chain, block.number)) == Some(&block.hash) {
            self.by_number.remove(&(chain, block.number));
        }
        self.heads.insert(chain, block.parent_hash);
        tracing::warn!(target: "graph", "Invalidated block {} ({:?}) of chain {}", block.number, block.hash, chain);
    }

    fn safety(&mut self, key: BlockKey) -> SafetyLabel {
        if !self.blocks.contains_key(&key) {
            return SafetyLabel::Unknown;
        }

        let mut visited = HashSet::new();
        let mut stack = vec![key];
        while let Some(next) = stack.pop() {
            if !visited.insert(next) {
                continue;
            }
            // Untracked parents are the anchors the chain was followed from.
            let Some(node) = self.blocks.get(&next) else {
                continue;
            };
            if node.cross_unsafe {
                continue;
            }
            if !node.unverified.is_empty() {
                return SafetyLabel::Unsafe;
            }
            for dependency in &node.dependencies {
                match (self.dependency_key(dependency), dependency) {
                    (Some(target), _) => stack.push(target),
                    (None, Dependency::Message { chain, number })
                        if self.is_pruned(*chain, *number) => {}
                    (None, _) => return SafetyLabel::Unsafe,
                }
            }
        }

        if let Some(node) = self.blocks.get_mut(&key) {
            node.cross_unsafe = true;
        }
        SafetyLabel::CrossUnsafe
    }

    /// Drops every block at or before `finalized_timestamp` whose messages are all verified.
    fn prune(&mut self, finalized_timestamp: u64) -> usize {
        let finalized = self
            .blocks
            .iter()
            .filter(|(_, node)| {
                node.block.timestamp <= finalized_timestamp && node.unverified.is_empty()
            })
            .map(|(key, _)| *key)
            .collect::<Vec<_>>();

        for key in &finalized {
            let Some(node) = self.blocks.remove(key) else {
                continue;
            };
            for dependency in &node.dependencies {
                let target = Self::edge_target(dependency, &node.block, key.chain);
                if let Some(set) = self.dependents.get_mut(&target) {
                    set.remove(key);
                    if set.is_empty() {
                        self.dependents.remove(&target);
                    }
                }
            }
            let height = (key.chain, node.block.number);
            if self.by_number.get(&height) == Some(&key.hash) {
                self.by_number.remove(&height);
                self.dependents.remove(&height);
            }
            let floor = self.pruned.entry(key.chain).or_default();
            *floor = (*floor).max(node.block.number);
        }
        finalized.len()
    }
}

/// The [DependencyGraph] follows the blocks of every chain in the dependency set and the
/// cross-chain messages they execute.
pub struct DependencyGraph {
    sources: HashMap<U256, Arc<dyn BlockSource>>,
    inbox: Address,
    verifier: Arc<dyn MessageVerifier>,
    state: Mutex<GraphState>,
}

impl DependencyGraph {
    pub fn new(
        sources: HashMap<U256, Arc<dyn BlockSource>>,
        inbox: Address,
        verifier: Arc<dyn MessageVerifier>,
    ) -> Self {
        Self {
            sources,
            inbox,
            verifier,
            state: Mutex::new(GraphState::default()),
        }
    }

    /// Returns the hash of the latest block added for `chain`.
    pub async fn head(&self, chain: U256) -> Option<H256> {
        self.state.lock().await.heads.get(&chain).copied()
    }

    /// Returns the executing messages of a block that are not yet verified.
    pub async fn unverified_messages(&self, chain: U256, hash: H256) -> Vec<ExecutingMessage> {
        self.state
            .lock()
            .await
            .blocks
            .get(&BlockKey { chain, hash })
            .map(|node| node.unverified.clone())
            .unwrap_or_default()
    }

    /// Adds the next block of `chain`.
    ///
    /// ### Takes
    /// - `chain`: The chain the block belongs to.
    /// - `block`: The block, which must extend the chain's head. The first block added for a
    ///   chain anchors it.
    ///
    /// ### Returns
    /// - `Ok(Vec<ExecutingMessage>)`: The executing messages the block contains.
    /// - `Err(DependencyError)`: The block does not extend the head or could not be fetched.
    pub async fn add_block(
        &self,
        chain: U256,
        block: BlockRef,
    ) -> Result<Vec<ExecutingMessage>, DependencyError> {
        let source = self
            .sources
            .get(&chain)
            .ok_or(DependencyError::UnknownChain(chain))?;
        let mut state = self.state.lock().await;
        if let Some(&head) = state.heads.get(&chain) {
            if head != block.parent_hash {
                return Err(DependencyError::HeadMismatch {
                    chain,
                    head,
                    got: block.hash,
                });
            }
        }

        let messages = source
            .block_transactions(&block)
            .await
            .map_err(|e| DependencyError::Fetch(block.hash, e))?
            .iter()
            .filter_map(|tx| parse_transaction(tx, self.inbox))
            .collect::<Vec<_>>();

        let key = BlockKey {
            chain,
            hash: block.hash,
        };
        let mut dependencies = Vec::with_capacity(messages.len() + 1);
        for message in &messages {
            if message.id.block_number > U256::from(u64::MAX) {
                // Never observable, so the message stays unverified.
                continue;
            }
            let dependency = Dependency::Message {
                chain: message.id.chain_id,
                number: message.id.block_number.as_u64(),
            };
            if !dependencies.contains(&dependency) {
                dependencies.push(dependency);
            }
        }
        dependencies.push(Dependency::Parent(BlockKey {
            chain,
            hash: block.parent_hash,
        }));
        for dependency in &dependencies {
            let target = GraphState::edge_target(dependency, &block, chain);
            state.dependents.entry(target).or_default().insert(key);
        }

        state.blocks.insert(
            key,
            Node {
                block,
                dependencies,
                unverified: messages.clone(),
                cross_unsafe: false,
            },
        );
        state.by_number.insert((chain, block.number), block.hash);
        state.heads.insert(chain, block.hash);
        tracing::debug!(target: "graph", "Added block {} ({:?}) of chain {} with {} executing messages", block.number, block.hash, chain, messages.len());

        let mut pending = vec![key];
        if let Some(dependents) = state.dependents.get(&(chain, block.number)) {
            pending.extend(dependents.iter().copied());
        }
        for key in pending {
            self.resolve_messages(&mut state, key).await;
        }
        Ok(messages)
    }

    /// Verifies the unverified messages of a block whose initiating blocks have been observed.
    /// A message found invalid invalidates the block.
    async fn resolve_messages(&self, state: &mut GraphState, key: BlockKey) {
        let Some(node) = state.blocks.get(&key) else {
            return;
        };
        let block = node.block;
        let messages = node.unverified.clone();

        let mut unverified = Vec::with_capacity(messages.len());
        for message in messages {
            let observed = message.id.block_number <= U256::from(u64::MAX)
                && state.observed(message.id.chain_id, message.id.block_number.as_u64());
            if !observed {
                unverified.push(message);
                continue;
            }
            match self
                .verifier
                .message_safety(&message.id, &message.payload)
                .await
            {
                Ok(SafetyLabel::Invalid) => {
                    tracing::warn!(target: "graph", "Block {:?} of chain {} executes an invalid message", block.hash, key.chain);
                    state.invalidate(key.chain, &block);
                    return;
                }
                Ok(label) => {
                    tracing::debug!(target: "graph", "Verified message of block {:?}, labelled {}", block.hash, label);
                }
                Err(e) => {
                    tracing::warn!(target: "graph", "Unable to verify message of block {:?}: {}", block.hash, e);
                    unverified.push(message);
                }
            }
        }

        if let Some(node) = state.blocks.get_mut(&key) {
            node.unverified = unverified;
        }
    }

    /// Returns the safety of a block: [SafetyLabel::Unsafe] while it or anything it depends on
    /// executes an unverified message, [SafetyLabel::CrossUnsafe] otherwise.
    /// Blocks that are not tracked are [SafetyLabel::Unknown].
    pub async fn block_safety(&self, chain: U256, block: &BlockRef) -> SafetyLabel {
        self.state.lock().await.safety(BlockKey {
            chain,
            hash: block.hash,
        })
    }

    /// Forgets the finalized blocks, those at or before `finalized_timestamp`, once their
    /// messages are verified. Messages initiated in pruned blocks count as observed.
    ///
    /// ### Returns
    /// - `usize`: The number of blocks pruned.
    pub async fn prune(&self, finalized_timestamp: u64) -> usize {
        let pruned = self.state.lock().await.prune(finalized_timestamp);
        if pruned > 0 {
            tracing::debug!(target: "graph", "Pruned {} blocks finalized at timestamp {}", pruned, finalized_timestamp);
        }
        pruned
    }

    /// Drops `block` and every block depending on it, rewinding each affected chain's head to
    /// the parent of the dropped block.
    pub async fn invalidate(&self, chain: U256, block: &BlockRef) {
        self.state.lock().await.invalidate(chain, block);
    }
}
