//! The driver of the op-challenger agent: discovers dispute games, schedules a player per game,
//! and submits the moves its solver decides.

use anyhow::Result;
use async_trait::async_trait;

/// Contains the smart contract bindings used by the driver.
pub mod bindings;

mod types;
pub use types::{GameMetadata, GameStatus, TxCandidate};

mod config;
pub use config::{
    Config, ConfigError, TraceType, DEFAULT_CANNON_INFO_FREQ, DEFAULT_CANNON_SNAPSHOT_FREQ,
};

mod loader;
pub use loader::{claim_from_contract, ContractLoader, GameLoader};

mod responder;
pub use responder::{EthersTxManager, FaultResponder, Responder, TxManager};

mod agent;
pub use agent::Agent;

mod player;
pub use player::{FaultGamePlayer, FaultPlayerCreator, GamePlayer, PlayerCreator};

pub mod scheduler;
pub use scheduler::{DiskManager, Scheduler, SchedulerError};

mod discovery;
pub use discovery::{DiscoveryError, GameFinder};

mod monitor;
pub use monitor::{filter_games, GameMonitor, L1Client};

/// The [Driver] trait defines the interface for all driver loops that are ran by the `op-challenger` binary.
#[async_trait]
pub trait Driver {
    /// Creates a new [Driver] with the given configuration.
    async fn try_new(config: Config) -> Result<Self>
    where
        Self: Sized;

    /// Starts the [Driver] loop.
    async fn start(self) -> Result<()>;
}
