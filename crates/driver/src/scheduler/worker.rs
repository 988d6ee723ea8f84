use super::{Job, JobResult};
use tokio::sync::{mpsc, watch};

/// Runs jobs from the run queue until shutdown is signalled or either queue closes. A job that is
/// running when shutdown is signalled is finished first.
///
/// Each job runs on its own task, so a panicking player only loses its own game's player and is
/// reported as an unresolved result.
pub async fn run_worker(
    jobs: async_channel::Receiver<Job>,
    results: mpsc::Sender<JobResult>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let Job { game, mut player } = tokio::select! {
            _ = shutdown.changed() => return,
            job = jobs.recv() => match job {
                Ok(job) => job,
                Err(_) => return,
            },
        };

        let mut task = tokio::spawn(async move {
            let resolved = player.progress_game().await;
            (player, resolved)
        });
        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = shutdown.changed() => {
                // A move may be mid-submission, so the current round runs to completion.
                tracing::debug!(target: "scheduler", "Finishing game {:?} before shutdown", game);
                if let Err(e) = task.await {
                    tracing::error!(target: "scheduler", "Player for game {:?} failed: {}", game, e);
                }
                return;
            }
        };
        let result = match joined {
            Ok((player, resolved)) => JobResult {
                game,
                player: Some(player),
                resolved,
            },
            Err(e) => {
                tracing::error!(target: "scheduler", "Player for game {:?} failed: {}", game, e);
                JobResult {
                    game,
                    player: None,
                    resolved: false,
                }
            }
        };

        if results.send(result).await.is_err() {
            return;
        }
    }
}
