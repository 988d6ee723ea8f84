//! Errors raised by the game graph and the solver.

use crate::trace::TraceError;
use thiserror::Error;

/// Violations of the game graph invariants.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("claim already exists in the game")]
    ClaimExists,
    #[error("parent claim is not in the game")]
    NoParent,
    #[error("claim not found in the game")]
    ClaimNotFound,
}

/// Failures of the [Solver](super::Solver).
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("game depth reached, a step is required instead of a move")]
    GameDepthReached,
    #[error("cannot step on a non-leaf claim")]
    StepNonLeaf,
    #[error("cannot step on a claim the agent agrees with")]
    StepAgreedClaim,
    #[error(transparent)]
    Trace(#[from] TraceError),
}
