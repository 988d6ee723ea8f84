//! Plays an honest challenger against a dishonest defender over an in-memory alphabet game.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::types::H256;
use op_toolkit_driver::{Agent, GameLoader, GameStatus, Responder};
use op_toolkit_solvers::{
    fault::{Claim, Position, Solver, StepCallData},
    trace::{AlphabetTraceProvider, PreimageOracleData, TraceProvider},
};
use std::sync::Arc;
use tokio::sync::Mutex;

const MAX_DEPTH: u32 = 4;
const HONEST: &str = "abcdefgh";
const DISHONEST: &str = "abcdexyz";

/// A dispute game contract kept in memory. Moves mark their parent as countered.
#[derive(Default)]
struct InMemoryGame {
    claims: Mutex<Vec<Claim>>,
    steps: Mutex<Vec<(&'static str, StepCallData)>>,
}

#[async_trait]
impl GameLoader for InMemoryGame {
    async fn fetch_claims(&self) -> Result<Vec<Claim>> {
        Ok(self.claims.lock().await.clone())
    }

    async fn fetch_status(&self) -> Result<GameStatus> {
        Ok(GameStatus::InProgress)
    }

    async fn fetch_claim_count(&self) -> Result<u64> {
        Ok(self.claims.lock().await.len() as u64)
    }

    async fn fetch_max_depth(&self) -> Result<u32> {
        Ok(MAX_DEPTH)
    }

    async fn fetch_absolute_prestate_hash(&self) -> Result<H256> {
        Ok(H256::zero())
    }
}

/// Submits the moves of one player to the shared [InMemoryGame].
struct Player {
    name: &'static str,
    game: Arc<InMemoryGame>,
}

#[async_trait]
impl Responder for Player {
    async fn call_resolve(&self) -> Result<GameStatus> {
        Ok(GameStatus::InProgress)
    }

    async fn resolve(&self) -> Result<()> {
        Err(anyhow!("game cannot be resolved yet"))
    }

    async fn respond(&self, claim: &Claim) -> Result<()> {
        let mut claims = self.game.claims.lock().await;
        let parent = claims
            .get_mut(claim.parent_contract_index as usize)
            .ok_or_else(|| anyhow!("unknown parent {}", claim.parent_contract_index))?;
        parent.countered = true;
        let contract_index = claims.len() as u32;
        claims.push(Claim {
            contract_index,
            ..claim.clone()
        });
        Ok(())
    }

    async fn step(&self, step: &StepCallData) -> Result<()> {
        self.game.claims.lock().await[step.claim_index as usize].countered = true;
        self.game.steps.lock().await.push((self.name, step.clone()));
        Ok(())
    }

    async fn update_oracle(&self, _: &PreimageOracleData) -> Result<()> {
        Ok(())
    }
}

fn agent(name: &'static str, trace: &str, agree: bool, game: &Arc<InMemoryGame>) -> Agent {
    let provider = AlphabetTraceProvider::new(trace, MAX_DEPTH).unwrap();
    Agent::new(
        Solver::new(Arc::new(provider), MAX_DEPTH),
        Arc::clone(game) as Arc<dyn GameLoader>,
        Arc::new(Player {
            name,
            game: Arc::clone(game),
        }),
        MAX_DEPTH,
        agree,
    )
}

#[tokio::test]
async fn honest_challenger_steps_at_first_disagreement() {
    let honest = AlphabetTraceProvider::new(HONEST, MAX_DEPTH).unwrap();
    let dishonest = AlphabetTraceProvider::new(DISHONEST, MAX_DEPTH).unwrap();
    let root = Claim::root(
        dishonest
            .get(Position::ROOT.trace_index(MAX_DEPTH))
            .await
            .unwrap(),
    );
    let game = Arc::new(InMemoryGame {
        claims: Mutex::new(vec![root]),
        ..Default::default()
    });

    let challenger = agent("challenger", HONEST, true, &game);
    let defender = agent("defender", DISHONEST, false, &game);
    for _ in 0..MAX_DEPTH {
        challenger.act().await.unwrap();
        defender.act().await.unwrap();
    }

    let claims = game.claims.lock().await.clone();
    let positions = claims.iter().map(Claim::position).collect::<Vec<_>>();
    assert_eq!(
        positions,
        vec![
            Position::ROOT,
            Position::new(1, 0),
            Position::new(2, 0),
            Position::new(3, 2),
            Position::new(4, 4),
        ]
    );
    for claim in claims.iter().filter(|c| c.depth() % 2 == 1) {
        let expected = honest
            .get(claim.position().trace_index(MAX_DEPTH))
            .await
            .unwrap();
        assert_eq!(claim.value(), expected);
    }

    // Both traces agree up to index 4, so the leaf at index 4 is defended from its own state.
    let expected = StepCallData {
        claim_index: 4,
        is_attack: false,
        state_data: honest.get_step_data(4).await.unwrap().pre_state,
        proof: Default::default(),
    };
    assert_eq!(
        *game.steps.lock().await,
        vec![("challenger", expected)]
    );

    // The stepped leaf is countered, so further rounds are idle.
    challenger.act().await.unwrap();
    defender.act().await.unwrap();
    assert_eq!(game.claims.lock().await.len(), 5);
    assert_eq!(game.steps.lock().await.len(), 1);
}
