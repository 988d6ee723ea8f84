//! Data structures, types, and the game solver implementation for the fault dispute game.

mod position;
pub use position::{compute_gindex, Position};

mod types;
pub use types::*;

mod error;
pub use error::{GameError, SolverError};

mod game;
pub use game::Game;

mod solver;
pub use solver::Solver;
