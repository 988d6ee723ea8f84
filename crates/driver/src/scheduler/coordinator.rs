use super::{DiskManager, Job, JobResult, SchedulerError};
use crate::{GamePlayer, PlayerCreator};
use async_channel::TrySendError;
use ethers::types::Address;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{mpsc, watch};

/// The scheduling state of a single game.
#[derive(Default)]
struct GameState {
    /// Whether a job for the game is queued or running.
    scheduled: bool,
    resolved: bool,
    /// The game's player, absent while it is out with a job or when it could not be built.
    player: Option<Box<dyn GamePlayer>>,
}

/// The [Coordinator] owns the state of every known game and turns schedule requests into jobs.
pub struct Coordinator {
    states: HashMap<Address, GameState>,
    creator: Arc<dyn PlayerCreator>,
    disk: DiskManager,
    jobs: async_channel::Sender<Job>,
    results: mpsc::Receiver<JobResult>,
}

impl Coordinator {
    pub fn new(
        creator: Arc<dyn PlayerCreator>,
        disk: DiskManager,
        jobs: async_channel::Sender<Job>,
        results: mpsc::Receiver<JobResult>,
    ) -> Self {
        Self {
            states: HashMap::new(),
            creator,
            disk,
            jobs,
            results,
        }
    }

    /// Processes schedule requests and job results until shutdown is signalled.
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<Vec<Address>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(games) = requests.recv() => {
                    if let Err(e) = self.schedule(&games).await {
                        tracing::error!(target: "scheduler", "Failed to schedule games: {}", e);
                        if e == SchedulerError::Closed {
                            break;
                        }
                    }
                }
                Some(result) = self.results.recv() => {
                    if let Err(e) = self.process_result(result).await {
                        tracing::warn!(target: "scheduler", "Failed to process job result: {}", e);
                    }
                }
                else => break,
            }
        }
        tracing::info!(target: "scheduler", "Coordinator stopped");
    }

    /// Queues a round of play for every listed game that is neither scheduled nor resolved,
    /// forgetting games that are no longer listed.
    pub async fn schedule(&mut self, games: &[Address]) -> Result<(), SchedulerError> {
        self.states
            .retain(|game, state| state.scheduled || games.contains(game));

        let mut jobs = Vec::new();
        for game in games {
            let state = self.states.entry(*game).or_default();
            if state.scheduled || state.resolved {
                continue;
            }
            if state.player.is_none() {
                let dir = self.disk.dir_for_game(*game);
                match self.creator.create_player(*game, &dir).await {
                    Ok(player) => state.player = Some(player),
                    Err(e) => {
                        tracing::error!(target: "scheduler", "Failed to create player for game {:?}: {}", game, e);
                        continue;
                    }
                }
            }
            if let Some(player) = state.player.take() {
                state.scheduled = true;
                jobs.push(Job {
                    game: *game,
                    player,
                });
            }
        }

        for job in jobs {
            self.enqueue(job).await?;
        }
        self.clean_disk().await;
        Ok(())
    }

    /// Pushes a job onto the run queue, draining job results while the queue is full.
    async fn enqueue(&mut self, mut job: Job) -> Result<(), SchedulerError> {
        loop {
            match self.jobs.try_send(job) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(pending)) => {
                    job = pending;
                    let result = self.results.recv().await.ok_or(SchedulerError::Closed)?;
                    if let Err(e) = self.process_result(result).await {
                        tracing::warn!(target: "scheduler", "Failed to process job result: {}", e);
                    }
                }
                Err(TrySendError::Closed(_)) => return Err(SchedulerError::Closed),
            }
        }
    }

    /// Records the outcome of a job and returns the player to its game.
    pub async fn process_result(&mut self, result: JobResult) -> Result<(), SchedulerError> {
        let state = self
            .states
            .get_mut(&result.game)
            .ok_or(SchedulerError::UnknownGame(result.game))?;
        state.scheduled = false;
        state.resolved = result.resolved;
        state.player = result.player;
        self.clean_disk().await;
        Ok(())
    }

    /// Deletes the data of every game that is neither in progress nor scheduled.
    async fn clean_disk(&mut self) {
        let keep = self
            .states
            .iter()
            .filter(|(_, state)| state.scheduled || !state.resolved)
            .map(|(game, _)| *game)
            .collect::<Vec<_>>();
        if let Err(e) = self.disk.remove_all_except(&keep).await {
            tracing::error!(target: "scheduler", "Unable to clean up game data: {}", e);
        }
    }
}
