//! The `player` module contains the [GamePlayer]s the scheduler drives, and the
//! [PlayerCreator] that builds them.

use crate::{
    bindings::{FaultDisputeGame, Mips},
    Agent, Config, ContractLoader, EthersTxManager, FaultResponder, GameLoader, GameStatus,
    TraceType,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider},
    types::{Address, H256},
    utils::keccak256,
};
use op_toolkit_solvers::{
    fault::Solver,
    trace::{
        cannon::{CannonExecutor, CannonTraceProvider},
        AlphabetTraceProvider, TraceProvider,
    },
};
use std::{path::Path, sync::Arc};

/// The [GamePlayer] trait defines the interface the scheduler uses to progress a game.
#[async_trait]
pub trait GamePlayer: Send {
    /// Plays a single round of the game.
    ///
    /// ### Returns
    /// - `true` once the game has been resolved.
    async fn progress_game(&mut self) -> bool;
}

/// The [PlayerCreator] trait builds the [GamePlayer] of a newly discovered game.
#[async_trait]
pub trait PlayerCreator: Send + Sync {
    /// Creates the player of the game at `game`, storing any game data in `dir`.
    async fn create_player(&self, game: Address, dir: &Path) -> Result<Box<dyn GamePlayer>>;
}

/// The [FaultGamePlayer] drives an [Agent] through a fault dispute game until it is resolved.
pub struct FaultGamePlayer {
    agent: Agent,
    loader: Arc<dyn GameLoader>,
    game: Address,
    completed: bool,
}

impl FaultGamePlayer {
    /// Creates a new [FaultGamePlayer].
    ///
    /// Games that are already resolved are marked as completed without further checks. Otherwise,
    /// the absolute prestate of `trace` must match the one the game was created with.
    pub async fn new(
        game: Address,
        agent: Agent,
        loader: Arc<dyn GameLoader>,
        trace: &dyn TraceProvider,
    ) -> Result<Self> {
        let status = loader.fetch_status().await?;
        if status != GameStatus::InProgress {
            tracing::info!(target: "player", "Game {:?} already resolved: {}", game, status);
            return Ok(Self {
                agent,
                loader,
                game,
                completed: true,
            });
        }

        let onchain = loader.fetch_absolute_prestate_hash().await?;
        let local = H256::from(keccak256(trace.absolute_pre_state().await?));
        if onchain != local {
            bail!(
                "Trace provider's absolute prestate does not match onchain absolute prestate. Onchain: {:?}, Local: {:?}",
                onchain,
                local
            );
        }

        Ok(Self {
            agent,
            loader,
            game,
            completed: false,
        })
    }
}

#[async_trait]
impl GamePlayer for FaultGamePlayer {
    async fn progress_game(&mut self) -> bool {
        if self.completed {
            return true;
        }
        if let Err(e) = self.agent.act().await {
            tracing::error!(target: "player", "Error when acting on game {:?}: {}", self.game, e);
        }

        let status = match self.loader.fetch_status().await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(target: "player", "Unable to retrieve game status of {:?}: {}", self.game, e);
                return false;
            }
        };
        match status {
            GameStatus::InProgress => {
                let claims = self.loader.fetch_claim_count().await.unwrap_or_default();
                tracing::info!(target: "player", "Game info. Game: {:?}, Claims: {}, Status: {}", self.game, claims, status);
            }
            GameStatus::ChallengerWon | GameStatus::DefenderWon => {
                let expected = GameStatus::expected(self.agent.agree_with_proposed_output());
                if status == expected {
                    tracing::info!(target: "player", "Game won. Game: {:?}, Status: {}", self.game, status);
                } else {
                    tracing::error!(target: "player", "Game lost. Game: {:?}, Status: {}", self.game, status);
                }
            }
        }
        self.completed = status != GameStatus::InProgress;
        self.completed
    }
}

/// The [FaultPlayerCreator] builds [FaultGamePlayer]s that submit transactions through `client`.
pub struct FaultPlayerCreator<M> {
    config: Config,
    client: Arc<M>,
    l2: Option<Provider<Http>>,
}

impl<M: Middleware + 'static> FaultPlayerCreator<M> {
    pub fn new(config: Config, client: Arc<M>) -> Result<Self> {
        let l2 = match config.trace_type {
            TraceType::Alphabet => None,
            TraceType::Cannon => Some(Provider::<Http>::try_from(config.cannon.l2_rpc.as_str())?),
        };
        Ok(Self { config, client, l2 })
    }

    async fn trace_provider(
        &self,
        contract: &FaultDisputeGame<M>,
        loader: &ContractLoader<M>,
        dir: &Path,
        max_depth: u32,
    ) -> Result<(Arc<dyn TraceProvider>, Address)> {
        match self.config.trace_type {
            TraceType::Alphabet => {
                let state = self.config.alphabet_trace.as_deref().unwrap_or_default();
                let provider = AlphabetTraceProvider::new(state, max_depth)?;
                Ok((Arc::new(provider), Address::zero()))
            }
            TraceType::Cannon => {
                let l2 = self
                    .l2
                    .as_ref()
                    .ok_or_else(|| anyhow!("Missing L2 client for the cannon trace"))?;
                let inputs = loader.fetch_local_inputs(l2).await?;
                let mut cannon = self.config.cannon.clone();
                cannon.l1_rpc = self.config.l1_eth_rpc.clone();
                let prestate = cannon.prestate.clone();
                let executor = CannonExecutor::new(cannon, inputs);
                let provider =
                    CannonTraceProvider::new(dir, prestate, Arc::new(executor), max_depth);

                let vm = contract.vm().call().await?;
                let oracle = Mips::new(vm, Arc::clone(&self.client))
                    .oracle()
                    .call()
                    .await?;
                Ok((Arc::new(provider), oracle))
            }
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> PlayerCreator for FaultPlayerCreator<M> {
    async fn create_player(&self, game: Address, dir: &Path) -> Result<Box<dyn GamePlayer>> {
        let contract = FaultDisputeGame::new(game, Arc::clone(&self.client));
        let loader = Arc::new(ContractLoader::new(contract.clone()));
        let max_depth = loader.fetch_max_depth().await?;
        let (trace, oracle) = self
            .trace_provider(&contract, &loader, dir, max_depth)
            .await?;

        let tx_mgr = Arc::new(EthersTxManager::new(
            Arc::clone(&self.client),
            self.config.tx_confirmations,
        ));
        let responder = Arc::new(FaultResponder::new(tx_mgr, game, oracle));
        let agent = Agent::new(
            Solver::new(Arc::clone(&trace), max_depth),
            Arc::clone(&loader) as Arc<dyn GameLoader>,
            responder,
            max_depth,
            self.config.agree_with_proposed_output,
        );
        let player = FaultGamePlayer::new(game, agent, loader, trace.as_ref()).await?;
        Ok(Box::new(player))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::agent::test::{RecordingResponder, StaticLoader};
    use op_toolkit_solvers::fault::Claim;

    const MAX_DEPTH: u32 = 3;

    async fn player(
        status: GameStatus,
        prestate_hash: Option<H256>,
        agree: bool,
    ) -> Result<FaultGamePlayer> {
        let trace = AlphabetTraceProvider::new("abcdefgh", MAX_DEPTH).unwrap();
        let local = H256::from(keccak256(trace.absolute_pre_state().await.unwrap()));
        let root = Claim::root(trace.get(7).await.unwrap());
        let loader = Arc::new(StaticLoader {
            claims: vec![root],
            status,
            prestate_hash: prestate_hash.unwrap_or(local),
        });
        let responder = Arc::new(RecordingResponder::new(Some(GameStatus::InProgress)));
        let trace = Arc::new(trace);
        let agent = Agent::new(
            Solver::new(Arc::clone(&trace) as Arc<dyn TraceProvider>, MAX_DEPTH),
            Arc::clone(&loader) as Arc<dyn GameLoader>,
            responder,
            MAX_DEPTH,
            agree,
        );
        FaultGamePlayer::new(Address::repeat_byte(1), agent, loader, trace.as_ref()).await
    }

    #[tokio::test]
    async fn rejects_mismatched_prestate() {
        let result = player(GameStatus::InProgress, Some(H256::repeat_byte(0xab)), false).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn in_progress_games_are_not_completed() {
        let mut player = player(GameStatus::InProgress, None, false).await.unwrap();
        assert!(!player.progress_game().await);
        assert!(!player.progress_game().await);
    }

    #[tokio::test]
    async fn resolved_games_are_completed() {
        // Resolved games skip the prestate check.
        let mut player = player(GameStatus::DefenderWon, Some(H256::repeat_byte(0xab)), false)
            .await
            .unwrap();
        assert!(player.progress_game().await);

        let mut lost = player_with_status(GameStatus::ChallengerWon).await;
        assert!(lost.progress_game().await);
    }

    async fn player_with_status(status: GameStatus) -> FaultGamePlayer {
        player(status, None, false).await.unwrap()
    }
}
