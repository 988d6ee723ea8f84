//! The `agent` module contains the [Agent], which plays a single round of moves in a game.

use crate::{GameLoader, GameStatus, Responder};
use anyhow::{anyhow, Result};
use op_toolkit_solvers::fault::{Claim, Game, Response, Solver, SolverError, StepCallData};
use std::sync::Arc;

/// The [Agent] reads the current state of a game, decides the responses to every claim it
/// disagrees with, and submits them.
pub struct Agent {
    solver: Solver,
    loader: Arc<dyn GameLoader>,
    responder: Arc<dyn Responder>,
    max_depth: u32,
    agree_with_proposed_output: bool,
}

impl Agent {
    pub fn new(
        solver: Solver,
        loader: Arc<dyn GameLoader>,
        responder: Arc<dyn Responder>,
        max_depth: u32,
        agree_with_proposed_output: bool,
    ) -> Self {
        Self {
            solver,
            loader,
            responder,
            max_depth,
            agree_with_proposed_output,
        }
    }

    pub fn agree_with_proposed_output(&self) -> bool {
        self.agree_with_proposed_output
    }

    /// Performs a single round of the game: resolves it when it can be won, and otherwise
    /// responds to every claim that needs a counter.
    pub async fn act(&self) -> Result<()> {
        if self.try_resolve().await {
            return Ok(());
        }

        let status = self.loader.fetch_status().await?;
        if status != GameStatus::InProgress {
            tracing::debug!(target: "agent", "Game is already resolved: {}", status);
            return Ok(());
        }

        let game = self.new_game_from_contracts().await?;
        let responses = self.decide(&game).await;
        for response in responses {
            if let Err(e) = self.submit(&response).await {
                tracing::error!(target: "agent", "Failed to submit response: {}", e);
            }
        }
        Ok(())
    }

    /// Resolves the game if it has ended in the agent's favor.
    ///
    /// ### Returns
    /// - `true` if a resolve transaction was submitted.
    async fn try_resolve(&self) -> bool {
        let status = match self.responder.call_resolve().await {
            Ok(status) => status,
            Err(_) => return false,
        };
        if status == GameStatus::InProgress || !self.should_resolve(status) {
            return false;
        }

        tracing::info!(target: "agent", "Resolving game");
        if let Err(e) = self.responder.resolve().await {
            tracing::error!(target: "agent", "Failed to resolve game: {}", e);
            return false;
        }
        true
    }

    fn should_resolve(&self, status: GameStatus) -> bool {
        let expected = GameStatus::expected(self.agree_with_proposed_output);
        if status != expected {
            tracing::warn!(target: "agent", "Game will be lost. Expected: {}, Actual: {}", expected, status);
        }
        status == expected
    }

    async fn new_game_from_contracts(&self) -> Result<Game> {
        let mut claims = self.loader.fetch_claims().await?.into_iter();
        let root = claims
            .next()
            .ok_or_else(|| anyhow!("Game contains no claims"))?;
        let mut game = Game::new(root, self.agree_with_proposed_output, self.max_depth);
        game.put_all(claims)?;
        Ok(game)
    }

    /// Computes the responses to the claims of `game` without submitting any of them.
    async fn decide(&self, game: &Game) -> Vec<Response> {
        let mut responses = Vec::new();
        for claim in game.claims() {
            if claim.countered || game.agree_with_claim_level(&claim) {
                continue;
            }
            if claim.depth() == self.max_depth {
                match self.solver.attempt_step(&claim, false).await {
                    Ok(step) => responses.push(Response::Step(step)),
                    Err(e) => {
                        tracing::warn!(target: "agent", "Failed to compute step against claim {}: {}", claim.contract_index, e);
                    }
                }
                continue;
            }
            match self.solver.next_move(&claim, false).await {
                Ok(Some(counter)) => {
                    if Self::is_known_move(game, &counter) {
                        tracing::debug!(target: "agent", "Skipping duplicate move against claim {}", claim.contract_index);
                        continue;
                    }
                    responses.push(Response::Move(counter));
                }
                Ok(None) | Err(SolverError::GameDepthReached) => {}
                Err(e) => {
                    tracing::warn!(target: "agent", "Failed to compute move against claim {}: {}", claim.contract_index, e);
                }
            }
        }
        responses
    }

    fn is_known_move(game: &Game, counter: &Claim) -> bool {
        game.is_duplicate(counter) || game.contains_move(counter.parent_contract_index, counter.value())
    }

    async fn submit(&self, response: &Response) -> Result<()> {
        match response {
            Response::Move(claim) => {
                tracing::info!(target: "agent", "Performing move against claim {} at depth {}", claim.parent_contract_index, claim.depth());
                self.responder.respond(claim).await
            }
            Response::Step(step) => {
                if let Some(oracle_data) = &step.oracle_data {
                    tracing::info!(target: "agent", "Updating preimage oracle before step");
                    self.responder.update_oracle(oracle_data).await?;
                }
                tracing::info!(target: "agent", "Performing step against claim {}, attack: {}", step.leaf_claim.contract_index, step.is_attack);
                self.responder.step(&StepCallData::from(step)).await
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use async_trait::async_trait;
    use ethers::types::H256;
    use op_toolkit_solvers::{
        fault::{ClaimData, Position},
        trace::{AlphabetTraceProvider, PreimageOracleData, TraceProvider},
    };
    use tokio::sync::Mutex;

    /// A [GameLoader] serving a fixed set of claims.
    pub(crate) struct StaticLoader {
        pub(crate) claims: Vec<Claim>,
        pub(crate) status: GameStatus,
        pub(crate) prestate_hash: H256,
    }

    #[async_trait]
    impl GameLoader for StaticLoader {
        async fn fetch_claims(&self) -> Result<Vec<Claim>> {
            Ok(self.claims.clone())
        }

        async fn fetch_status(&self) -> Result<GameStatus> {
            Ok(self.status)
        }

        async fn fetch_claim_count(&self) -> Result<u64> {
            Ok(self.claims.len() as u64)
        }

        async fn fetch_max_depth(&self) -> Result<u32> {
            Ok(MAX_DEPTH)
        }

        async fn fetch_absolute_prestate_hash(&self) -> Result<H256> {
            Ok(self.prestate_hash)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Action {
        Resolve,
        Respond(Claim),
        Step(StepCallData),
        UpdateOracle(PreimageOracleData),
    }

    /// A [Responder] recording every action it is asked to take.
    pub(crate) struct RecordingResponder {
        pub(crate) resolve_status: Option<GameStatus>,
        pub(crate) actions: Mutex<Vec<Action>>,
    }

    impl RecordingResponder {
        pub(crate) fn new(resolve_status: Option<GameStatus>) -> Self {
            Self {
                resolve_status,
                actions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Responder for RecordingResponder {
        async fn call_resolve(&self) -> Result<GameStatus> {
            self.resolve_status
                .ok_or_else(|| anyhow!("execution reverted"))
        }

        async fn resolve(&self) -> Result<()> {
            self.actions.lock().await.push(Action::Resolve);
            Ok(())
        }

        async fn respond(&self, claim: &Claim) -> Result<()> {
            self.actions.lock().await.push(Action::Respond(claim.clone()));
            Ok(())
        }

        async fn step(&self, step: &StepCallData) -> Result<()> {
            self.actions.lock().await.push(Action::Step(step.clone()));
            Ok(())
        }

        async fn update_oracle(&self, data: &PreimageOracleData) -> Result<()> {
            self.actions
                .lock()
                .await
                .push(Action::UpdateOracle(data.clone()));
            Ok(())
        }
    }

    const MAX_DEPTH: u32 = 3;

    async fn trace(state: &str) -> AlphabetTraceProvider {
        AlphabetTraceProvider::new(state, MAX_DEPTH).unwrap()
    }

    async fn value_at(state: &str, position: Position) -> H256 {
        trace(state)
            .await
            .get(position.trace_index(MAX_DEPTH))
            .await
            .unwrap()
    }

    fn agent(
        claims: Vec<Claim>,
        agree: bool,
        resolve_status: Option<GameStatus>,
    ) -> (Agent, Arc<RecordingResponder>) {
        let provider = AlphabetTraceProvider::new("abcdefgh", MAX_DEPTH).unwrap();
        let solver = Solver::new(Arc::new(provider), MAX_DEPTH);
        let loader = Arc::new(StaticLoader {
            claims,
            status: GameStatus::InProgress,
            prestate_hash: H256::zero(),
        });
        let responder = Arc::new(RecordingResponder::new(resolve_status));
        let agent = Agent::new(
            solver,
            loader,
            Arc::clone(&responder) as Arc<dyn Responder>,
            MAX_DEPTH,
            agree,
        );
        (agent, responder)
    }

    fn child(parent: &Claim, contract_index: u32, value: H256, position: Position) -> Claim {
        Claim {
            claim_data: ClaimData::new(value, position),
            parent: parent.claim_data,
            contract_index,
            parent_contract_index: parent.contract_index,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn attacks_dishonest_root() {
        let root = Claim::root(value_at("abcdexyz", Position::ROOT).await);
        let (agent, responder) = agent(vec![root.clone()], true, Some(GameStatus::InProgress));
        agent.act().await.unwrap();

        let actions = responder.actions.lock().await;
        let expected = child(
            &root,
            0,
            value_at("abcdefgh", Position::new(1, 0)).await,
            Position::new(1, 0),
        );
        assert_eq!(*actions, vec![Action::Respond(expected)]);
    }

    #[tokio::test]
    async fn skips_existing_moves() {
        let root = Claim::root(value_at("abcdexyz", Position::ROOT).await);
        let honest = child(
            &root,
            1,
            value_at("abcdefgh", Position::new(1, 0)).await,
            Position::new(1, 0),
        );
        let (agent, responder) = agent(vec![root, honest], true, Some(GameStatus::InProgress));
        agent.act().await.unwrap();
        assert!(responder.actions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn steps_against_leaves() {
        let root = Claim::root(value_at("abcdefgh", Position::ROOT).await);
        let c1 = child(&root, 1, H256::repeat_byte(0xd1), Position::new(1, 0));
        let c2 = child(
            &c1,
            2,
            value_at("abcdefgh", Position::new(2, 0)).await,
            Position::new(2, 0),
        );
        // A dishonest leaf at trace index 0 is attacked from the absolute prestate.
        let leaf = child(&c2, 3, H256::repeat_byte(0xee), Position::new(3, 0));
        let (agent, responder) = agent(
            vec![root.clone(), c1.clone(), c2.clone(), leaf.clone()],
            false,
            Some(GameStatus::InProgress),
        );
        agent.act().await.unwrap();

        let prestate = trace("abcdefgh").await.absolute_pre_state().await.unwrap();
        let expected = StepCallData {
            claim_index: 3,
            is_attack: true,
            state_data: prestate,
            proof: Default::default(),
        };
        assert_eq!(*responder.actions.lock().await, vec![Action::Step(expected)]);

        let mut countered = leaf;
        countered.countered = true;
        let (agent, responder) = self::agent(
            vec![root, c1, c2, countered],
            false,
            Some(GameStatus::InProgress),
        );
        agent.act().await.unwrap();
        assert!(responder.actions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn resolves_won_games() {
        let root = Claim::root(value_at("abcdexyz", Position::ROOT).await);
        let (agent, responder) = agent(vec![root], true, Some(GameStatus::ChallengerWon));
        agent.act().await.unwrap();
        assert_eq!(*responder.actions.lock().await, vec![Action::Resolve]);
    }

    #[tokio::test]
    async fn does_not_resolve_lost_games() {
        let root = Claim::root(value_at("abcdefgh", Position::ROOT).await);
        let (agent, responder) = agent(vec![root], true, Some(GameStatus::DefenderWon));
        agent.act().await.unwrap();
        assert!(responder.actions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn empty_games_are_errors() {
        let (agent, _) = agent(Vec::new(), false, None);
        assert!(agent.act().await.is_err());
    }
}
