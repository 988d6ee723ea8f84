use ethers::types::{Address, Bytes, U256};
use std::fmt;

/// The [GameStatus] enum defines the lifecycle states of a dispute game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GameStatus {
    InProgress = 0,
    ChallengerWon = 1,
    DefenderWon = 2,
}

impl GameStatus {
    /// The status the agent is playing towards.
    pub fn expected(agree_with_proposed_output: bool) -> Self {
        if agree_with_proposed_output {
            GameStatus::ChallengerWon
        } else {
            GameStatus::DefenderWon
        }
    }
}

impl TryFrom<u8> for GameStatus {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GameStatus::InProgress),
            1 => Ok(GameStatus::ChallengerWon),
            2 => Ok(GameStatus::DefenderWon),
            _ => Err(anyhow::anyhow!("Invalid game status: {}", value)),
        }
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameStatus::InProgress => write!(f, "In Progress"),
            GameStatus::ChallengerWon => write!(f, "Challenger Won"),
            GameStatus::DefenderWon => write!(f, "Defender Won"),
        }
    }
}

/// A game listed by the dispute game factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameMetadata {
    pub proxy: Address,
    /// The UNIX timestamp of the game's creation.
    pub timestamp: u64,
}

/// A transaction to be signed and submitted by a [TxManager](crate::TxManager).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TxCandidate {
    pub to: Address,
    pub tx_data: Bytes,
    pub gas_limit: Option<U256>,
}
