//! Background expiry of conversation memory.
//!
//! Every `interval` the sweeper deletes messages older than `retention` across
//! all sessions. The first sweep runs one interval after start. Failures are
//! logged and the next tick tries again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regchat_core::config::MemoryConfig;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::memory::{ConversationStore, StoreError};

pub struct MemorySweeper {
    store: Arc<dyn ConversationStore>,
    retention: chrono::Duration,
    interval: Duration,
}

/// Running sweeper. Dropping it leaves the task running; call `stop`.
pub struct SweeperHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MemorySweeper {
    pub fn new(store: Arc<dyn ConversationStore>, retention: chrono::Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
        }
    }

    pub fn from_config(store: Arc<dyn ConversationStore>, config: &MemoryConfig) -> Self {
        Self::new(store, config.retention(), config.sweep_interval())
    }

    /// Delete everything older than `now - retention`. Returns the number deleted.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = now - self.retention;
        let deleted = self.store.sweep(cutoff).await?;
        if deleted > 0 {
            tracing::info!(deleted, cutoff = %cutoff, store = self.store.name(), "Expired chat messages deleted");
        } else {
            tracing::debug!(cutoff = %cutoff, "Memory sweep found nothing to delete");
        }
        Ok(deleted)
    }

    /// Spawn the periodic loop. Stops when the handle's token is cancelled.
    pub fn start(self) -> SweeperHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            tracing::info!(
                "Memory sweeper started (interval: {}s, retention: {}min)",
                self.interval.as_secs(),
                self.retention.num_minutes()
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once(Utc::now()).await {
                            tracing::warn!("Memory sweep failed (will retry next tick): {}", e);
                        }
                    }
                    _ = token.cancelled() => {
                        tracing::info!("Memory sweeper shutting down");
                        break;
                    }
                }
            }
        });

        SweeperHandle { cancel, task }
    }
}

impl SweeperHandle {
    /// Cancel the loop and wait for an in-flight sweep to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!("Memory sweeper task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::memory::InMemoryConversationStore;
    use crate::testing::BrokenStore;
    use regchat_core::{Message, Role};

    fn seeded(now: DateTime<Utc>) -> Arc<InMemoryConversationStore> {
        Arc::new(InMemoryConversationStore::with_messages(vec![
            Message::new("a", Role::User, "3h old").at(now - chrono::Duration::hours(3)),
            Message::new("b", Role::Assistant, "2h01m old").at(now - chrono::Duration::minutes(121)),
            Message::new("a", Role::User, "1h old").at(now - chrono::Duration::hours(1)),
        ]))
    }

    #[tokio::test]
    async fn test_run_once_deletes_only_expired_messages() {
        let now = Utc::now();
        let store = seeded(now);
        let sweeper = MemorySweeper::new(store.clone(), chrono::Duration::hours(2), Duration::from_secs(3600));

        assert_eq!(sweeper.run_once(now).await.unwrap(), 2);
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(sweeper.run_once(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_once_surfaces_store_errors() {
        let sweeper = MemorySweeper::new(Arc::new(BrokenStore), chrono::Duration::hours(2), Duration::from_secs(1));
        assert!(sweeper.run_once(Utc::now()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_sweeps_after_first_interval_and_stops() {
        let now = Utc::now();
        let store = seeded(now);
        let handle = MemorySweeper::new(store.clone(), chrono::Duration::hours(2), Duration::from_secs(60)).start();

        // no sweep before the first interval elapses
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(store.len().unwrap(), 3);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(store.len().unwrap(), 1);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_survives_failing_store() {
        let handle = MemorySweeper::new(Arc::new(BrokenStore), chrono::Duration::hours(2), Duration::from_secs(10)).start();

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert!(!handle.is_finished());

        handle.stop().await;
    }
}
