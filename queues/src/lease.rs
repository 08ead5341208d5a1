use std::{sync::Arc, time::Duration};

use scrapeworks_database::LeaseStorage;
use scrapeworks_graceful_shutdown::GracefulShutdownConsumer;
use tokio::sync::watch;
use tracing::{event, Level};

/// Whether this process currently holds the scheduler lease.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaseState {
    Active,
    Standby,
}

/// Renews a named lease on an interval of `ttl / 3` and tracks whether this
/// process currently holds it. Losing a renewal (contention, or a Redis
/// hiccup) moves the manager to [`LeaseState::Standby`] within `ttl`.
pub struct LeaseManager {
    storage: Arc<dyn LeaseStorage>,
    name: String,
    owner: String,
    ttl: Duration,
    state_tx: watch::Sender<LeaseState>,
}

#[derive(Clone)]
pub struct LeaseStateConsumer(watch::Receiver<LeaseState>);

impl LeaseStateConsumer {
    pub fn is_active(&self) -> bool {
        *self.0.borrow() == LeaseState::Active
    }
}

impl LeaseManager {
    pub fn new(
        storage: Arc<dyn LeaseStorage>,
        name: impl Into<String>,
        owner: impl Into<String>,
        ttl: Duration,
    ) -> (Self, LeaseStateConsumer) {
        let (state_tx, state_rx) = watch::channel(LeaseState::Standby);
        (
            LeaseManager {
                storage,
                name: name.into(),
                owner: owner.into(),
                ttl,
                state_tx,
            },
            LeaseStateConsumer(state_rx),
        )
    }

    pub fn state_consumer(&self) -> LeaseStateConsumer {
        LeaseStateConsumer(self.state_tx.subscribe())
    }

    /// Runs the renewal loop until shutdown. Spawn this as a background
    /// task; observe [`LeaseStateConsumer`] to know when it's safe to do
    /// scheduler work.
    pub fn run(self, mut shutdown: GracefulShutdownConsumer) -> tokio::task::JoinHandle<()> {
        let renewal_interval = self.ttl / 3;
        tokio::spawn(async move {
            loop {
                let acquired = match self
                    .storage
                    .maybe_acquire(&self.name, &self.owner, self.ttl)
                    .await
                {
                    Ok(acquired) => acquired,
                    Err(e) => {
                        event!(Level::WARN, error=%e, lease=%self.name, "lease renewal failed");
                        false
                    }
                };

                let new_state = if acquired {
                    LeaseState::Active
                } else {
                    LeaseState::Standby
                };
                if *self.state_tx.borrow() != new_state {
                    event!(Level::INFO, lease=%self.name, owner=%self.owner, ?new_state, "lease state changed");
                }
                self.state_tx.send_replace(new_state);

                tokio::select! {
                    _ = tokio::time::sleep(renewal_interval) => {}
                    _ = shutdown.wait_for_shutdown() => {
                        self.storage.release(&self.name, &self.owner).await.ok();
                        self.state_tx.send_replace(LeaseState::Standby);
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapeworks_database::InMemoryLeaseStorage;
    use scrapeworks_graceful_shutdown::GracefulShutdown;

    #[tokio::test]
    async fn becomes_active_when_acquisition_succeeds() {
        let storage: Arc<dyn LeaseStorage> = Arc::new(InMemoryLeaseStorage::new());
        let mut shutdown = GracefulShutdown::new();
        let (manager, consumer) =
            LeaseManager::new(storage, "scheduler", "node-a", Duration::from_millis(60));
        assert!(!consumer.is_active());
        let handle = manager.run(shutdown.consumer());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(consumer.is_active());

        shutdown.shutdown();
        handle.await.unwrap();
        assert!(!consumer.is_active());
    }

    #[tokio::test]
    async fn second_owner_stays_standby_while_first_holds_lease() {
        let storage: Arc<dyn LeaseStorage> = Arc::new(InMemoryLeaseStorage::new());
        let mut shutdown_a = GracefulShutdown::new();
        let mut shutdown_b = GracefulShutdown::new();
        let (manager_a, consumer_a) = LeaseManager::new(
            storage.clone(),
            "scheduler",
            "node-a",
            Duration::from_secs(60),
        );
        let (manager_b, consumer_b) = LeaseManager::new(
            storage.clone(),
            "scheduler",
            "node-b",
            Duration::from_secs(60),
        );
        let handle_a = manager_a.run(shutdown_a.consumer());
        let handle_b = manager_b.run(shutdown_b.consumer());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(consumer_a.is_active());
        assert!(!consumer_b.is_active());

        shutdown_a.shutdown();
        shutdown_b.shutdown();
        handle_a.await.unwrap();
        handle_b.await.unwrap();
    }
}
