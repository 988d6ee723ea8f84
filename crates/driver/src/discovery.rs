//! The `discovery` module lists the games created by the dispute game factory.

use crate::{bindings::DisputeGameFactory, loader::narrow, GameMetadata};
use ethers::{providers::Middleware, types::U256};
use thiserror::Error;

/// Errors returned by the [GameFinder].
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("block number is missing")]
    MissingBlockNumber,
    #[error("failed to fetch game count")]
    GameCountFailure(#[source] anyhow::Error),
    #[error("failed to fetch game at index {0}")]
    GameAtIndexFailure(u64, #[source] anyhow::Error),
}

/// The [GameFinder] reads games from the [DisputeGameFactory].
pub struct GameFinder<M> {
    factory: DisputeGameFactory<M>,
}

impl<M: Middleware + 'static> GameFinder<M> {
    pub fn new(factory: DisputeGameFactory<M>) -> Self {
        Self { factory }
    }

    /// Fetches every game created at or after `earliest_timestamp`, as seen at block `block`.
    ///
    /// ### Takes
    /// - `block`: The block number all reads are pinned to.
    /// - `earliest_timestamp`: Older games are not returned.
    ///
    /// ### Returns
    /// - `Ok(Vec<GameMetadata>)`: The games, oldest first.
    pub async fn fetch_games(
        &self,
        block: Option<u64>,
        earliest_timestamp: u64,
    ) -> Result<Vec<GameMetadata>, DiscoveryError> {
        let block = block.ok_or(DiscoveryError::MissingBlockNumber)?;
        let count = self
            .factory
            .game_count()
            .block(block)
            .call()
            .await
            .map_err(|e| DiscoveryError::GameCountFailure(e.into()))?;
        let count =
            narrow(count, u64::MAX, "game count").map_err(DiscoveryError::GameCountFailure)?;

        let mut games = Vec::new();
        // Games are created in timestamp order, so walk back from the newest.
        for i in (0..count).rev() {
            let (proxy, timestamp) = self
                .factory
                .game_at_index(U256::from(i))
                .block(block)
                .call()
                .await
                .map_err(|e| DiscoveryError::GameAtIndexFailure(i, e.into()))?;
            let timestamp = timestamp.low_u64();
            if timestamp < earliest_timestamp {
                break;
            }
            games.push(GameMetadata { proxy, timestamp });
        }
        games.reverse();
        Ok(games)
    }
}
