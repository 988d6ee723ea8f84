//! The `finality` module tracks the timestamp of the local chain's finalized head.

use crate::BlockRef;
use anyhow::Result;
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::sync::{watch, RwLock};

/// A source of the chain's finalized head.
#[async_trait]
pub trait FinalizedSource: Send + Sync {
    async fn finalized_block(&self) -> Result<BlockRef>;
}

/// The [FinalityTracker] holds the timestamp of the latest finalized L2 block.
///
/// Clones share the same underlying value.
#[derive(Debug, Clone, Default)]
pub struct FinalityTracker {
    timestamp: Arc<RwLock<u64>>,
}

impl FinalityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn finalized_timestamp(&self) -> u64 {
        *self.timestamp.read().await
    }

    /// Records a new finalized timestamp. Returns whether the tracked value changed.
    pub async fn update(&self, timestamp: u64) -> bool {
        let mut current = self.timestamp.write().await;
        if *current == timestamp {
            return false;
        }
        *current = timestamp;
        true
    }
}

/// Polls `source` every `interval`, recording finalized head changes in `tracker` until
/// `shutdown` is signalled.
pub async fn poll_block_changes(
    source: Arc<dyn FinalizedSource>,
    tracker: FinalityTracker,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => match source.finalized_block().await {
                Ok(block) => {
                    if tracker.update(block.timestamp).await {
                        tracing::debug!(target: "finality", "Finalized head changed to {} ({:?})", block.number, block.hash);
                    }
                }
                Err(e) => tracing::warn!(target: "finality", "Failed to fetch the finalized head: {}", e),
            },
        }
    }
    tracing::info!(target: "finality", "Stopped polling the finalized head");
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Finalizes a new block, one second apart, on every call.
    #[derive(Default)]
    struct Advancing {
        calls: AtomicU64,
    }

    #[async_trait]
    impl FinalizedSource for Advancing {
        async fn finalized_block(&self) -> Result<BlockRef> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == 2 {
                anyhow::bail!("node unavailable");
            }
            Ok(BlockRef {
                number: call,
                timestamp: 1_000 + call,
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn updates_only_on_change() {
        let tracker = FinalityTracker::new();
        assert_eq!(tracker.finalized_timestamp().await, 0);
        assert!(tracker.update(10).await);
        assert!(!tracker.update(10).await);
        assert!(tracker.clone().update(11).await);
        assert_eq!(tracker.finalized_timestamp().await, 11);
    }

    #[tokio::test]
    async fn polls_until_shutdown() {
        let source = Arc::new(Advancing::default());
        let tracker = FinalityTracker::new();
        let (shutdown, rx) = watch::channel(false);
        let poller = tokio::spawn(poll_block_changes(
            Arc::clone(&source) as Arc<dyn FinalizedSource>,
            tracker.clone(),
            Duration::from_millis(5),
            rx,
        ));

        while source.calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.send(true).unwrap();
        poller.await.unwrap();

        let calls = source.calls.load(Ordering::SeqCst);
        assert!(tracker.finalized_timestamp().await >= 1_003);
        assert_eq!(tracker.finalized_timestamp().await, 1_000 + calls);
    }
}
