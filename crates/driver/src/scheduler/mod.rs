//! The `scheduler` module runs game players on a bounded pool of workers.
//!
//! A single coordinator task owns the state of every game and hands each game's player to the
//! workers as a [Job]. A game is never progressed by two workers at once: its player travels
//! with the job and is returned in the [JobResult].

use crate::{GamePlayer, PlayerCreator};
use ethers::types::Address;
use std::sync::Arc;
use thiserror::Error;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

mod coordinator;
pub use coordinator::Coordinator;

mod disk;
pub use disk::DiskManager;

mod worker;
pub use worker::run_worker;

/// Errors returned by the [Scheduler].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is busy")]
    Busy,
    #[error("scheduler is closed")]
    Closed,
    #[error("result received for unknown game {0:?}")]
    UnknownGame(Address),
}

/// A request to progress a single game.
pub struct Job {
    pub game: Address,
    pub player: Box<dyn GamePlayer>,
}

/// The outcome of a [Job]. `player` is `None` when the player panicked.
pub struct JobResult {
    pub game: Address,
    pub player: Option<Box<dyn GamePlayer>>,
    pub resolved: bool,
}

/// The [Scheduler] is the handle to a running coordinator and its workers.
pub struct Scheduler {
    schedule_tx: mpsc::Sender<Vec<Address>>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Starts the coordinator and `max_concurrency` workers.
    pub fn start(
        creator: Arc<dyn PlayerCreator>,
        disk: DiskManager,
        max_concurrency: usize,
    ) -> Self {
        let (schedule_tx, schedule_rx) = mpsc::channel(1);
        let (jobs_tx, jobs_rx) = async_channel::bounded(max_concurrency * 2);
        let (results_tx, results_rx) = mpsc::channel(max_concurrency * 2);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mut handles = Vec::with_capacity(max_concurrency + 1);
        for _ in 0..max_concurrency {
            handles.push(tokio::spawn(run_worker(
                jobs_rx.clone(),
                results_tx.clone(),
                shutdown_rx.clone(),
            )));
        }
        let coordinator = Coordinator::new(creator, disk, jobs_tx, results_rx);
        handles.push(tokio::spawn(coordinator.run(schedule_rx, shutdown_rx)));

        tracing::info!(target: "scheduler", "Started scheduler with {} workers", max_concurrency);
        Self {
            schedule_tx,
            shutdown,
            handles,
        }
    }

    /// Requests a round of play for the given games. Returns [SchedulerError::Busy] while the
    /// previous request has not been picked up yet.
    pub fn schedule(&self, games: Vec<Address>) -> Result<(), SchedulerError> {
        self.schedule_tx.try_send(games).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SchedulerError::Busy,
            mpsc::error::TrySendError::Closed(_) => SchedulerError::Closed,
        })
    }

    /// Signals shutdown and waits for the coordinator and every worker to stop.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(target: "scheduler", "Scheduler task failed: {}", e);
            }
        }
    }
}
