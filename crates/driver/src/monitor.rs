//! The `monitor` module contains the [GameMonitor], the main loop of the challenger agent.

use crate::{
    bindings::DisputeGameFactory, Config, DiskManager, Driver, FaultPlayerCreator, GameFinder,
    GameMetadata, Scheduler, SchedulerError,
};
use anyhow::Result;
use async_trait::async_trait;
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Middleware, Provider},
    signers::LocalWallet,
    types::Address,
};
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

/// The client used to read games and submit transactions on L1.
pub type L1Client = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Returns the games that should be played: those created at or after `earliest_timestamp`
/// and, when `allowlist` is non-empty, listed in it.
pub fn filter_games(
    games: &[GameMetadata],
    allowlist: &[Address],
    earliest_timestamp: u64,
) -> Vec<Address> {
    games
        .iter()
        .filter(|game| game.timestamp >= earliest_timestamp)
        .filter(|game| allowlist.is_empty() || allowlist.contains(&game.proxy))
        .map(|game| game.proxy)
        .collect()
}

/// The [GameMonitor] polls the L1 head and schedules every game it should play on each new block.
pub struct GameMonitor {
    config: Config,
    client: Arc<L1Client>,
    finder: GameFinder<L1Client>,
    scheduler: Scheduler,
}

#[async_trait]
impl Driver for GameMonitor {
    async fn try_new(config: Config) -> Result<Self> {
        config.check()?;
        let provider = Provider::<Http>::try_from(config.l1_eth_rpc.as_str())?;
        let wallet: LocalWallet = config.private_key.parse()?;
        let client = Arc::new(SignerMiddleware::new_with_provider_chain(provider, wallet).await?);

        let factory = DisputeGameFactory::new(config.game_factory_address, Arc::clone(&client));
        let creator = Arc::new(FaultPlayerCreator::new(config.clone(), Arc::clone(&client))?);
        let scheduler = Scheduler::start(
            creator,
            DiskManager::new(&config.datadir),
            config.max_concurrency,
        );

        Ok(Self {
            config,
            client,
            finder: GameFinder::new(factory),
            scheduler,
        })
    }

    async fn start(self) -> Result<()> {
        tracing::info!(target: "monitor", "Monitoring games of factory {:?}", self.config.game_factory_address);
        let mut interval = tokio::time::interval(self.config.poll_interval);
        let mut last_block = None;
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!(target: "monitor", "Shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.progress_games(&mut last_block).await {
                        tracing::error!(target: "monitor", "Failed to progress games: {}", e);
                    }
                }
            }
        }

        self.scheduler.close().await;
        Ok(())
    }
}

impl GameMonitor {
    /// Schedules every game that should be played, once per new L1 block.
    async fn progress_games(&self, last_block: &mut Option<u64>) -> Result<()> {
        let block = self.client.get_block_number().await?.as_u64();
        if *last_block == Some(block) {
            return Ok(());
        }
        *last_block = Some(block);

        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let earliest = now.saturating_sub(self.config.game_window.as_secs());
        let games = self.finder.fetch_games(Some(block), earliest).await?;
        let games = filter_games(&games, &self.config.game_allowlist, earliest);
        tracing::debug!(target: "monitor", "Scheduling {} games at block {}", games.len(), block);

        match self.scheduler.schedule(games) {
            Ok(()) => Ok(()),
            Err(SchedulerError::Busy) => {
                tracing::debug!(target: "monitor", "Scheduler busy, skipping block {}", block);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
