//! The solver module holds the [Solver], which decides the agent's response to a single claim.

use super::{Claim, ClaimData, SolverError, StepData};
use crate::trace::{StepProof, TraceProvider};
use std::sync::Arc;

/// The [Solver] decides counter claims and leaf steps from the view of a [TraceProvider].
#[derive(Clone)]
pub struct Solver {
    trace: Arc<dyn TraceProvider>,
    max_depth: u32,
}

impl Solver {
    pub fn new(trace: Arc<dyn TraceProvider>, max_depth: u32) -> Self {
        Self { trace, max_depth }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Computes the counter claim to a non-leaf claim.
    ///
    /// ### Takes
    /// - `claim`: The claim to respond to.
    /// - `agree_with_level`: Whether the agent agrees with claims at the depth of `claim`.
    ///
    /// ### Returns
    /// - `Ok(Some(Claim))`: The attack or defense to post.
    /// - `Ok(None)`: The agent should not counter this claim.
    /// - `Err(SolverError::GameDepthReached)`: The claim is a leaf, and must be stepped on instead.
    pub async fn next_move(
        &self,
        claim: &Claim,
        agree_with_level: bool,
    ) -> Result<Option<Claim>, SolverError> {
        if agree_with_level {
            return Ok(None);
        }
        if claim.depth() >= self.max_depth {
            return Err(SolverError::GameDepthReached);
        }

        let position = if self.agree_with_claim(claim).await? {
            // The root claim has no sibling range to defend into.
            if claim.is_root() {
                return Ok(None);
            }
            claim.position().defend()
        } else {
            claim.position().attack()
        };

        let value = self.trace.get(position.trace_index(self.max_depth)).await?;
        Ok(Some(Claim {
            claim_data: ClaimData::new(value, position),
            parent: claim.claim_data,
            parent_contract_index: claim.contract_index,
            ..Default::default()
        }))
    }

    /// Computes the step to execute against a leaf claim.
    ///
    /// ### Takes
    /// - `claim`: The leaf claim to step against.
    /// - `agree_with_level`: Whether the agent agrees with claims at the depth of `claim`.
    ///
    /// ### Returns
    /// - `Ok(StepData)`: The pre-state, proof and oracle data of the step.
    /// - `Err(SolverError::StepNonLeaf)`: The claim is not at the maximum depth.
    /// - `Err(SolverError::StepAgreedClaim)`: The agent agrees with the claim's level.
    pub async fn attempt_step(
        &self,
        claim: &Claim,
        agree_with_level: bool,
    ) -> Result<StepData, SolverError> {
        if claim.depth() != self.max_depth {
            return Err(SolverError::StepNonLeaf);
        }
        if agree_with_level {
            return Err(SolverError::StepAgreedClaim);
        }

        let index = claim.position().trace_index(self.max_depth);
        let is_attack = !self.agree_with_claim(claim).await?;
        let step = if is_attack {
            if index == 0 {
                StepProof {
                    pre_state: self.trace.absolute_pre_state().await?,
                    ..Default::default()
                }
            } else {
                self.trace.get_step_data(index - 1).await?
            }
        } else {
            self.trace.get_step_data(index).await?
        };

        Ok(StepData {
            leaf_claim: claim.clone(),
            is_attack,
            pre_state: step.pre_state,
            proof: step.proof,
            oracle_data: step.oracle_data,
        })
    }

    /// Returns `true` if the trace agrees with the value of the claim.
    async fn agree_with_claim(&self, claim: &Claim) -> Result<bool, SolverError> {
        let ours = self
            .trace
            .get(claim.position().trace_index(self.max_depth))
            .await?;
        Ok(ours == claim.value())
    }
}
