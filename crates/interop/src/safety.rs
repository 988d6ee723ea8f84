//! The `safety` module classifies executing messages by verifying their initiating log on the
//! peer chain.

use crate::{BlockInfo, FinalityTracker, MessageIdentifier, SafetyLabel};
use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Log, U256};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

/// A source of the logs of a chain's blocks.
#[async_trait]
pub trait LogsProvider: Send + Sync {
    /// Fetches the header fields and every log of the block at `number`.
    async fn block_logs(&self, number: u64) -> Result<(BlockInfo, Vec<Log>)>;
}

/// Errors returned while classifying a message.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("chain {0} is not in the dependency set")]
    ChainUnknown(U256),
    #[error("failed to fetch logs of block {number} on chain {chain}")]
    Rpc {
        chain: U256,
        number: u64,
        #[source]
        source: anyhow::Error,
    },
}

impl MessageError {
    /// The label of a message that could not be classified.
    pub fn label(&self) -> SafetyLabel {
        SafetyLabel::Unknown
    }
}

/// Classifies executing messages.
#[async_trait]
pub trait MessageVerifier: Send + Sync {
    async fn message_safety(
        &self,
        id: &MessageIdentifier,
        payload: &[u8],
    ) -> Result<SafetyLabel, MessageError>;
}

/// The [MessageSafetyOracle] checks messages against the logs of the chains in its dependency set.
pub struct MessageSafetyOracle {
    chains: HashMap<U256, Arc<dyn LogsProvider>>,
    finality: FinalityTracker,
}

impl MessageSafetyOracle {
    pub fn new(chains: HashMap<U256, Arc<dyn LogsProvider>>, finality: FinalityTracker) -> Self {
        Self { chains, finality }
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = &U256> {
        self.chains.keys()
    }
}

/// Returns the payload a log emits: its topics followed by its data.
pub fn log_payload(log: &Log) -> Vec<u8> {
    let mut payload = Vec::with_capacity(log.topics.len() * 32 + log.data.len());
    for topic in &log.topics {
        payload.extend_from_slice(topic.as_bytes());
    }
    payload.extend_from_slice(&log.data);
    payload
}

#[async_trait]
impl MessageVerifier for MessageSafetyOracle {
    async fn message_safety(
        &self,
        id: &MessageIdentifier,
        payload: &[u8],
    ) -> Result<SafetyLabel, MessageError> {
        let provider = self
            .chains
            .get(&id.chain_id)
            .ok_or(MessageError::ChainUnknown(id.chain_id))?;
        if id.block_number > U256::from(u64::MAX) {
            return Ok(SafetyLabel::Invalid);
        }
        let number = id.block_number.as_u64();
        let (block, logs) = provider
            .block_logs(number)
            .await
            .map_err(|source| MessageError::Rpc {
                chain: id.chain_id,
                number,
                source,
            })?;

        if id.timestamp != block.timestamp {
            tracing::debug!(target: "safety", "Message timestamp {} does not match block {} timestamp {}", id.timestamp, number, block.timestamp);
            return Ok(SafetyLabel::Invalid);
        }
        let Some(log) = usize::try_from(id.log_index)
            .ok()
            .and_then(|index| logs.get(index))
        else {
            tracing::debug!(target: "safety", "Log index {} out of range in block {}", id.log_index, number);
            return Ok(SafetyLabel::Invalid);
        };
        if log.address != id.origin || log_payload(log) != payload {
            tracing::debug!(target: "safety", "Log {} of block {} does not match the message", id.log_index, number);
            return Ok(SafetyLabel::Invalid);
        }

        if id.timestamp <= self.finality.finalized_timestamp().await {
            Ok(SafetyLabel::Finalized)
        } else {
            Ok(SafetyLabel::Unknown)
        }
    }
}
