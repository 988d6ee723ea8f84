//! The `loader` module reads the state of a dispute game from its contract.

use crate::{bindings::FaultDisputeGame, GameStatus};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::{
    providers::Middleware,
    types::{H256, U256},
};
use op_toolkit_solvers::{
    fault::{Claim, ClaimData, Clock, Position},
    trace::cannon::LocalGameInputs,
};

/// The [GameLoader] trait defines the reads the agent and player make against a dispute game.
#[async_trait]
pub trait GameLoader: Send + Sync {
    /// Fetches every claim of the game, in contract order.
    async fn fetch_claims(&self) -> Result<Vec<Claim>>;

    async fn fetch_status(&self) -> Result<GameStatus>;

    async fn fetch_claim_count(&self) -> Result<u64>;

    async fn fetch_max_depth(&self) -> Result<u32>;

    /// Fetches the hash of the absolute prestate the game was created with.
    async fn fetch_absolute_prestate_hash(&self) -> Result<H256>;
}

/// Builds the [Claim] at `contract_index` from the raw `claimData` fields, linking it to its
/// parent among the `claims` already loaded.
pub fn claim_from_contract(
    claims: &[Claim],
    contract_index: u32,
    (parent_index, countered, value, gindex, clock): (u32, bool, [u8; 32], u128, u128),
) -> Result<Claim> {
    let position = Position::from_gindex(gindex)
        .ok_or_else(|| anyhow!("Claim {} has an invalid position", contract_index))?;
    let parent = if parent_index == u32::MAX {
        ClaimData::default()
    } else {
        claims
            .get(parent_index as usize)
            .map(|parent| parent.claim_data)
            .ok_or_else(|| {
                anyhow!(
                    "Claim {} references unknown parent {}",
                    contract_index,
                    parent_index
                )
            })?
    };
    Ok(Claim {
        claim_data: ClaimData::new(H256::from(value), position),
        parent,
        countered,
        clock: Clock::from(clock),
        contract_index,
        parent_contract_index: parent_index,
    })
}

/// Narrows a contract word to `max`, failing instead of truncating.
pub(crate) fn narrow(value: U256, max: u64, what: &str) -> Result<u64> {
    if value > U256::from(max) {
        return Err(anyhow!("The {} {} read from the contract is out of range", what, value));
    }
    Ok(value.as_u64())
}

/// The [ContractLoader] reads a game through its [FaultDisputeGame] binding.
pub struct ContractLoader<M> {
    game: FaultDisputeGame<M>,
}

impl<M: Middleware + 'static> ContractLoader<M> {
    pub fn new(game: FaultDisputeGame<M>) -> Self {
        Self { game }
    }

    /// Fetches the inputs of the fault proof program for this game, using `l2` to look up the
    /// head of the agreed output.
    pub async fn fetch_local_inputs<L: Middleware>(&self, l2: &L) -> Result<LocalGameInputs> {
        let l1_head: [u8; 32] = self.game.method("l1Head", ())?.call().await?;
        type Proposal = (u128, u128, [u8; 32]);
        let (starting, disputed): (Proposal, Proposal) =
            self.game.method("proposals", ())?.call().await?;

        let agreed_block = l2
            .get_block(starting.1 as u64)
            .await
            .map_err(|e| anyhow!("Failed to fetch L2 block {}: {}", starting.1, e))?
            .ok_or_else(|| anyhow!("L2 block {} not found", starting.1))?;
        let l2_head = agreed_block
            .hash
            .ok_or_else(|| anyhow!("L2 block {} has no hash", starting.1))?;

        Ok(LocalGameInputs {
            l1_head: H256::from(l1_head),
            l2_head,
            l2_output_root: H256::from(starting.2),
            l2_claim: H256::from(disputed.2),
            l2_block_number: U256::from(disputed.1),
        })
    }
}

#[async_trait]
impl<M: Middleware + 'static> GameLoader for ContractLoader<M> {
    async fn fetch_claims(&self) -> Result<Vec<Claim>> {
        let count = self.fetch_claim_count().await?;
        let count = u32::try_from(count)
            .map_err(|_| anyhow!("Claim count {} exceeds the claim index range", count))?;
        let mut claims = Vec::new();
        for i in 0..count {
            let raw = self.game.claim_data(U256::from(i)).call().await?;
            let claim = claim_from_contract(&claims, i, raw)?;
            claims.push(claim);
        }
        Ok(claims)
    }

    async fn fetch_status(&self) -> Result<GameStatus> {
        GameStatus::try_from(self.game.status().call().await?)
    }

    async fn fetch_claim_count(&self) -> Result<u64> {
        let count = self.game.claim_data_len().call().await?;
        narrow(count, u64::MAX, "claim count")
    }

    async fn fetch_max_depth(&self) -> Result<u32> {
        let depth = self.game.max_game_depth().call().await?;
        Ok(narrow(depth, u32::MAX.into(), "max game depth")? as u32)
    }

    async fn fetch_absolute_prestate_hash(&self) -> Result<H256> {
        Ok(H256::from(self.game.absolute_prestate().call().await?))
    }
}
