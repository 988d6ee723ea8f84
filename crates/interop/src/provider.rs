//! The `provider` module reads chain data over JSON-RPC, retrying transient failures.

use crate::{
    receipts::{validate_receipts, Receipt},
    BlockInfo, BlockRef, BlockSource, FinalizedSource, LogsProvider,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::{
    providers::Middleware,
    types::{Block, BlockId, BlockNumber, Log, Transaction, H256},
};
use std::{future::Future, sync::Arc, time::Duration};
use tokio_retry::{strategy::FixedInterval, Retry};

/// The delay between two attempts of an RPC request.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(100);
/// The number of times a failed RPC request is retried.
pub const MAX_RETRIES: usize = 10;
/// The time an RPC request is given before it counts as failed.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(3);

/// Runs `request`, retrying it at a fixed interval when it fails or times out.
pub async fn with_retry<T, F, Fut>(mut request: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let strategy = FixedInterval::new(RETRY_INTERVAL).take(MAX_RETRIES);
    Retry::start(strategy, || {
        let attempt = request();
        async move {
            let result = match tokio::time::timeout(RPC_TIMEOUT, attempt).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!("request timed out after {:?}", RPC_TIMEOUT)),
            };
            if let Err(e) = &result {
                tracing::debug!(target: "rpc", "(Retrying) {}", e);
            }
            result
        }
    })
    .await
}

/// The [EthersChain] serves a chain's blocks, logs and receipts from an ethers [Middleware].
#[derive(Debug)]
pub struct EthersChain<M> {
    client: Arc<M>,
}

impl<M> Clone for EthersChain<M> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
        }
    }
}

impl<M: Middleware + 'static> EthersChain<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }

    async fn block(&self, id: BlockId) -> Result<Block<H256>> {
        let client = &self.client;
        with_retry(move || async move {
            client
                .get_block(id)
                .await?
                .ok_or_else(|| anyhow!("Block {:?} not found", id))
        })
        .await
    }

    /// Fetches a reference to the block `id`, such as the `latest` or `finalized` block.
    pub async fn block_ref(&self, id: impl Into<BlockId>) -> Result<BlockRef> {
        BlockRef::try_from(&self.block(id.into()).await?)
    }

    /// Fetches the receipts of the block `hash`, checking them against the block's receipts root.
    pub async fn fetch_receipts(&self, hash: H256) -> Result<(BlockInfo, Vec<Receipt>)> {
        let block = self.block(hash.into()).await?;
        self.block_receipts(&block).await
    }

    async fn block_receipts(&self, block: &Block<H256>) -> Result<(BlockInfo, Vec<Receipt>)> {
        let info = BlockInfo::from(BlockRef::try_from(block)?);
        let client = &self.client;
        let mut receipts = Vec::with_capacity(block.transactions.len());
        for tx in block.transactions.iter().copied() {
            let receipt =
                with_retry(move || async move { Ok(client.get_transaction_receipt(tx).await?) })
                    .await?;
            receipts.push(receipt.map(Receipt::from));
        }

        validate_receipts(&info, block.receipts_root, &block.transactions, &receipts)?;
        Ok((info, receipts.into_iter().flatten().collect()))
    }
}

#[async_trait]
impl<M: Middleware + 'static> LogsProvider for EthersChain<M> {
    /// Collects the logs of the block at `number` from its validated receipts.
    async fn block_logs(&self, number: u64) -> Result<(BlockInfo, Vec<Log>)> {
        let block = self.block(BlockNumber::Number(number.into()).into()).await?;
        let (info, receipts) = self.block_receipts(&block).await?;
        let logs = receipts.into_iter().flat_map(|r| r.logs).collect();
        Ok((info, logs))
    }
}

#[async_trait]
impl<M: Middleware + 'static> FinalizedSource for EthersChain<M> {
    async fn finalized_block(&self) -> Result<BlockRef> {
        self.block_ref(BlockNumber::Finalized).await
    }
}

#[async_trait]
impl<M: Middleware + 'static> BlockSource for EthersChain<M> {
    async fn block_transactions(&self, block: &BlockRef) -> Result<Vec<Transaction>> {
        let client = &self.client;
        let hash = block.hash;
        let block = with_retry(move || async move {
            client
                .get_block_with_txs(hash)
                .await?
                .ok_or_else(|| anyhow!("Block {:?} not found", hash))
        })
        .await?;
        Ok(block.transactions)
    }
}
