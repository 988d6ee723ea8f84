use ethers::types::{Address, Block, Bytes, H256, U256};
use std::fmt;

/// The [MessageIdentifier] points at the log of an initiating message on a peer chain.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageIdentifier {
    /// The address that emitted the log.
    pub origin: Address,
    pub block_number: U256,
    /// The index of the log within its block.
    pub log_index: u64,
    /// The timestamp of the block containing the log.
    pub timestamp: u64,
    pub chain_id: U256,
}

/// An executing message: a call to the inbox relaying the payload of an initiating message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecutingMessage {
    pub id: MessageIdentifier,
    pub target: Address,
    pub payload: Bytes,
}

/// The cross-chain safety of a message or block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyLabel {
    Invalid,
    Unsafe,
    CrossUnsafe,
    Safe,
    Finalized,
    Unknown,
}

impl fmt::Display for SafetyLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SafetyLabel::Invalid => "invalid",
            SafetyLabel::Unsafe => "unsafe",
            SafetyLabel::CrossUnsafe => "cross-unsafe",
            SafetyLabel::Safe => "safe",
            SafetyLabel::Finalized => "finalized",
            SafetyLabel::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// A reference to a block and its parent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub hash: H256,
    pub number: u64,
    pub parent_hash: H256,
    pub timestamp: u64,
}

impl<TX> TryFrom<&Block<TX>> for BlockRef {
    type Error = anyhow::Error;

    fn try_from(block: &Block<TX>) -> Result<Self, Self::Error> {
        Ok(Self {
            hash: block
                .hash
                .ok_or_else(|| anyhow::anyhow!("Block is missing its hash"))?,
            number: block
                .number
                .ok_or_else(|| anyhow::anyhow!("Block is missing its number"))?
                .as_u64(),
            parent_hash: block.parent_hash,
            timestamp: block.timestamp.low_u64(),
        })
    }
}

/// The header fields of a block that messages and receipts are checked against.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub hash: H256,
    pub number: u64,
    pub timestamp: u64,
}

impl From<BlockRef> for BlockInfo {
    fn from(block: BlockRef) -> Self {
        Self {
            hash: block.hash,
            number: block.number,
            timestamp: block.timestamp,
        }
    }
}

/// Identifies a block in the dependency graph.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub chain: U256,
    pub hash: H256,
}
