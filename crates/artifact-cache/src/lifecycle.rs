//! Startup and bounded shutdown of the retention sweeper

use crate::sweeper::RetentionSweeper;
use crate::types::SweeperState;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How the sweeper ended during shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The sweeper saw the stop signal and exited in time
    Graceful,
    /// The deadline passed and the task was aborted
    Forced,
}

/// Owns the running sweeper task and its stop signal
pub struct SweeperHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
    state: watch::Receiver<SweeperState>,
}

/// Spawn `sweeper` on the current runtime, bound to a fresh stop signal
pub fn start_sweeper(sweeper: RetentionSweeper) -> SweeperHandle {
    let shutdown = CancellationToken::new();
    let state = sweeper.subscribe();
    let task = tokio::spawn(sweeper.run(shutdown.clone()));
    SweeperHandle {
        shutdown,
        task,
        state,
    }
}

impl SweeperHandle {
    pub fn state(&self) -> watch::Receiver<SweeperState> {
        self.state.clone()
    }

    /// Signal the sweeper and wait up to `timeout` for it to exit.
    ///
    /// Past the deadline the task is aborted and awaited; errors from the
    /// aborted task are discarded. This never fails.
    pub async fn shutdown(mut self, timeout: Duration) -> ShutdownOutcome {
        self.shutdown.cancel();

        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(Ok(())) => {
                info!("Retention sweeper shut down");
                ShutdownOutcome::Graceful
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Retention sweeper ended abnormally");
                ShutdownOutcome::Graceful
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Retention sweeper did not stop in time, aborting"
                );
                self.task.abort();
                let _ = self.task.await;
                ShutdownOutcome::Forced
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::CacheIndex;
    use crate::store::ArtifactStore;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_shutdown_interrupts_wait() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "wav");
        store.init().await.unwrap();
        let sweeper = RetentionSweeper::new(
            store,
            Arc::new(CacheIndex::new()),
            Duration::from_secs(60),
            Duration::from_secs(24 * 60 * 60),
        );

        let handle = start_sweeper(sweeper);
        let state = handle.state();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        let outcome = handle.shutdown(Duration::from_secs(5)).await;

        assert_eq!(outcome, ShutdownOutcome::Graceful);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(*state.borrow(), SweeperState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_forces_unresponsive_task() {
        let (_tx, state) = watch::channel(SweeperState::Idle);
        let handle = SweeperHandle {
            shutdown: CancellationToken::new(),
            // Ignores the stop signal entirely
            task: tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }),
            state,
        };

        let outcome = handle.shutdown(Duration::from_millis(50)).await;
        assert_eq!(outcome, ShutdownOutcome::Forced);
    }
}
