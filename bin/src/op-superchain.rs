use anyhow::{anyhow, bail, Result};
use clap::{ArgAction, Parser};
use ethers::{
    providers::{Http, Middleware, Provider},
    types::{Address, BlockNumber, U256},
};
use op_toolkit::{init_tracing_subscriber, parse_address, parse_duration};
use op_toolkit_interop::{
    poll_block_changes, BlockRef, BlockSource, DependencyError, DependencyGraph, EthersChain,
    FinalityTracker, FinalizedSource, LogsProvider, MessageSafetyOracle, MessageVerifier,
    PeerRpcs,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::watch, task::JoinSet};

/// The number of followed blocks a chain can rewind through on a reorg.
const MAX_REWIND: usize = 256;

/// Arguments for the `op-superchain` binary.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Verbosity level (0-4)
    #[arg(long, short, help = "Verbosity level (0-4)", action = ArgAction::Count, env = "VERBOSITY")]
    v: u8,

    /// The RPC endpoint of the local L2 node.
    #[arg(long, env = "OP_SUPERCHAIN_L2_ETH_RPC")]
    l2_eth_rpc: String,

    /// The RPC endpoints of the peer chains, as comma separated `chain_id=url` entries.
    #[arg(long, env = "OP_SUPERCHAIN_L2_PEERS_ETH_RPCS", default_value = "")]
    l2_peers_eth_rpcs: PeerRpcs,

    /// The address of the cross-chain inbox.
    #[arg(long, env = "OP_SUPERCHAIN_INBOX_ADDRESS", value_parser = parse_address)]
    inbox_address: Address,

    /// The interval at which chain heads are polled.
    #[arg(long, env = "OP_SUPERCHAIN_POLL_INTERVAL", value_parser = parse_duration, default_value = "2s")]
    poll_interval: Duration,
}

type Chain = EthersChain<Provider<Http>>;

/// Follows the head of one chain, feeding its blocks into the dependency graph.
struct Follower {
    chain_id: U256,
    chain: Chain,
    graph: Arc<DependencyGraph>,
    oracle: Arc<MessageSafetyOracle>,
    finality: FinalityTracker,
    /// The followed blocks, newest last.
    followed: VecDeque<BlockRef>,
}

impl Follower {
    async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.follow().await {
                        tracing::error!(target: "op-superchain", "Failed to follow chain {}: {}", self.chain_id, e);
                    }
                }
            }
        }
    }

    /// Adds every block between the followed tip and the chain's latest block.
    async fn follow(&mut self) -> Result<()> {
        let latest = self.chain.block_ref(BlockNumber::Latest).await?;
        let Some(tip) = self.followed.back().copied() else {
            return self.add(latest).await;
        };
        if latest.hash == tip.hash {
            return Ok(());
        }

        let mut next = tip.number + 1;
        while next <= latest.number {
            let block = self.chain.block_ref(next).await?;
            match self.add(block).await {
                Ok(()) => next += 1,
                Err(e) if e.downcast_ref::<DependencyError>().is_some_and(|e| {
                    matches!(e, DependencyError::HeadMismatch { .. })
                }) =>
                {
                    next = self.rewind().await?;
                }
                Err(e) => return Err(e),
            }
        }

        let finalized = self.finality.finalized_timestamp().await;
        self.graph.prune(finalized).await;
        Ok(())
    }

    /// Invalidates the followed tip after a reorg, returning the height to resume from.
    async fn rewind(&mut self) -> Result<u64> {
        let tip = self
            .followed
            .pop_back()
            .ok_or_else(|| anyhow!("No followed block to rewind"))?;
        tracing::error!(target: "op-superchain", "Reorg of chain {} at block {} ({:?})", self.chain_id, tip.number, tip.hash);
        self.graph.invalidate(self.chain_id, &tip).await;
        if self.followed.is_empty() {
            bail!("Chain {} reorged deeper than {} blocks", self.chain_id, MAX_REWIND);
        }
        Ok(tip.number)
    }

    async fn add(&mut self, block: BlockRef) -> Result<()> {
        let messages = self.graph.add_block(self.chain_id, block).await?;
        self.followed.push_back(block);
        if self.followed.len() > MAX_REWIND {
            self.followed.pop_front();
        }

        for message in messages {
            match self
                .oracle
                .message_safety(&message.id, &message.payload)
                .await
            {
                Ok(label) => {
                    tracing::info!(target: "op-superchain", "Block {} of chain {} executes a message from chain {}: {}", block.number, self.chain_id, message.id.chain_id, label)
                }
                Err(e) => {
                    tracing::warn!(target: "op-superchain", "Block {} of chain {} executes a message from chain {}: {} ({})", block.number, self.chain_id, message.id.chain_id, e.label(), e)
                }
            }
        }
        let safety = self.graph.block_safety(self.chain_id, &block).await;
        tracing::info!(target: "op-superchain", "Block {} ({:?}) of chain {} is {}", block.number, block.hash, self.chain_id, safety);
        Ok(())
    }
}

async fn connect(url: &str) -> Result<(U256, Chain)> {
    let provider = Arc::new(Provider::<Http>::try_from(url)?);
    let chain_id = provider.get_chainid().await?;
    Ok((chain_id, EthersChain::new(provider)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse the command arguments
    let args = Args::parse();

    // Initialize the tracing subscriber
    init_tracing_subscriber(args.v)?;

    // Connect to the local chain and its peers.
    let (local_id, local) = connect(&args.l2_eth_rpc).await?;
    let mut chains = HashMap::new();
    chains.insert(local_id, local.clone());
    for (chain_id, url) in &args.l2_peers_eth_rpcs.0 {
        let (actual_id, chain) = connect(url).await?;
        if actual_id != *chain_id {
            bail!("Peer {} reports chain id {}, expected {}", url, actual_id, chain_id);
        }
        chains.insert(actual_id, chain);
    }
    tracing::info!(target: "op-superchain", "Following {} chains from local chain {}", chains.len(), local_id);

    let finality = FinalityTracker::new();
    let oracle = Arc::new(MessageSafetyOracle::new(
        chains
            .iter()
            .map(|(id, chain)| (*id, Arc::new(chain.clone()) as Arc<dyn LogsProvider>))
            .collect(),
        finality.clone(),
    ));
    let graph = Arc::new(DependencyGraph::new(
        chains
            .iter()
            .map(|(id, chain)| (*id, Arc::new(chain.clone()) as Arc<dyn BlockSource>))
            .collect(),
        args.inbox_address,
        Arc::clone(&oracle) as Arc<dyn MessageVerifier>,
    ));

    let (shutdown, shutdown_rx) = watch::channel(false);
    let mut tasks = JoinSet::new();
    tasks.spawn(poll_block_changes(
        Arc::new(local) as Arc<dyn FinalizedSource>,
        finality.clone(),
        args.poll_interval,
        shutdown_rx.clone(),
    ));
    for (chain_id, chain) in chains {
        let follower = Follower {
            chain_id,
            chain,
            graph: Arc::clone(&graph),
            oracle: Arc::clone(&oracle),
            finality: finality.clone(),
            followed: VecDeque::new(),
        };
        tasks.spawn(follower.run(args.poll_interval, shutdown_rx.clone()));
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!(target: "op-superchain", "Shutting down");
    shutdown.send(true)?;
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!(target: "op-superchain", "Task failed: {}", e);
        }
    }
    Ok(())
}
