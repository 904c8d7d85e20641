//! Periodic age-based reclamation of artifacts and their index entries

use crate::index::CacheIndex;
use crate::store::ArtifactStore;
use crate::types::{SweepReport, SweeperState};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deletes artifacts older than `max_age` every `interval`
pub struct RetentionSweeper {
    /// Directory being reclaimed
    store: ArtifactStore,
    /// Index shared with the request path; entries go with their files
    index: Arc<CacheIndex>,
    /// Artifacts older than this are deleted
    max_age: Duration,
    /// Pause between passes
    interval: Duration,
    /// Published for lifecycle observers
    state: watch::Sender<SweeperState>,
}

impl RetentionSweeper {
    pub fn new(
        store: ArtifactStore,
        index: Arc<CacheIndex>,
        max_age: Duration,
        interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SweeperState::Idle);
        Self {
            store,
            index,
            max_age,
            interval,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SweeperState> {
        self.state.subscribe()
    }

    /// Run one pass against the current time
    pub async fn sweep_once(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Run one pass treating `now` as the current time
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        self.scan(now, &CancellationToken::new()).await
    }

    /// Sweep immediately, then once per interval, until `shutdown` fires.
    ///
    /// The wait between passes and the pass itself both observe the token,
    /// so a stop request is honored without waiting out the interval.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            max_age_secs = self.max_age.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Retention sweeper started"
        );

        loop {
            self.state.send_replace(SweeperState::Scanning);
            let report = self.scan(Utc::now(), &shutdown).await;
            info!(
                scanned = report.scanned,
                deleted = report.deleted,
                failed = report.failed,
                "Retention sweep finished"
            );

            if shutdown.is_cancelled() {
                break;
            }

            self.state.send_replace(SweeperState::Idle);
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }

        self.state.send_replace(SweeperState::Stopping);
        debug!("Retention sweeper stopping");
        self.state.send_replace(SweeperState::Stopped);
        info!("Retention sweeper stopped");
    }

    async fn scan(&self, now: DateTime<Utc>, shutdown: &CancellationToken) -> SweepReport {
        let mut report = SweepReport::default();

        let listing = match self.store.list_all().await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(error = %e, "Failed to list artifacts");
                report.failed += 1;
                return report;
            }
        };
        futures::pin_mut!(listing);

        while let Some(item) = listing.next().await {
            if shutdown.is_cancelled() {
                debug!("Sweep interrupted by shutdown");
                break;
            }

            let artifact = match item {
                Ok(artifact) => artifact,
                Err(e) => {
                    warn!(error = %e, "Failed to inspect artifact, will retry next sweep");
                    report.failed += 1;
                    continue;
                }
            };
            report.scanned += 1;

            if !self.is_expired(artifact.modified, now) {
                continue;
            }

            // A regeneration can rename fresh bytes onto this path after the
            // listing; re-check age and skip fingerprints being generated.
            if let Some(fp) = self.store.fingerprint_of(&artifact.path) {
                if self.index.is_generating(&fp) {
                    debug!(fingerprint = %fp, "Skipping artifact being regenerated");
                    continue;
                }
            }
            match self.store.modified(&artifact.path).await {
                Ok(Some(modified)) if self.is_expired(modified, now) => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!(path = ?artifact.path, error = %e, "Failed to inspect artifact, will retry next sweep");
                    report.failed += 1;
                    continue;
                }
            }

            match self.store.delete(&artifact.path).await {
                Ok(deleted) => {
                    let dropped = self.index.remove_by_artifact(&artifact.path);
                    if deleted {
                        report.deleted += 1;
                    }
                    debug!(path = ?artifact.path, entries = dropped, "Expired artifact removed");
                }
                Err(e) => {
                    warn!(path = ?artifact.path, error = %e, "Failed to delete expired artifact");
                    report.failed += 1;
                }
            }
        }

        report
    }

    fn is_expired(&self, modified: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        // A modification time in the future reads as age zero
        (now - modified)
            .to_std()
            .map(|age| age > self.max_age)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{fingerprint, Fingerprint};
    use std::path::PathBuf;
    use std::time::SystemTime;
    use tempfile::tempdir;

    async fn aged_artifact(
        store: &ArtifactStore,
        index: &CacheIndex,
        text: &str,
        age_secs: u64,
    ) -> (Fingerprint, PathBuf) {
        let fp = fingerprint(text, "en");
        let path = store.write(&fp, text.as_bytes().to_vec()).await.unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
        index.insert(fp.clone(), path.clone());
        (fp, path)
    }

    async fn setup(max_age: Duration, interval: Duration) -> (tempfile::TempDir, RetentionSweeper) {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path(), "wav");
        store.init().await.unwrap();
        let sweeper = RetentionSweeper::new(store, Arc::new(CacheIndex::new()), max_age, interval);
        (dir, sweeper)
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_expired() {
        let (_dir, sweeper) = setup(Duration::from_secs(60), Duration::from_secs(3600)).await;
        let (fresh, fresh_path) = aged_artifact(&sweeper.store, &sweeper.index, "ten", 10).await;
        let (_, mid_path) = aged_artifact(&sweeper.store, &sweeper.index, "seventy", 70).await;
        let (_, old_path) = aged_artifact(&sweeper.store, &sweeper.index, "one-thirty", 130).await;

        let report = sweeper.sweep_once().await;

        assert_eq!(
            report,
            SweepReport {
                scanned: 3,
                deleted: 2,
                failed: 0
            }
        );
        assert!(sweeper.store.exists(&fresh_path).await);
        assert!(!sweeper.store.exists(&mid_path).await);
        assert!(!sweeper.store.exists(&old_path).await);
        assert_eq!(sweeper.index.keys(), vec![fresh]);
    }

    #[tokio::test]
    async fn test_sweep_uses_reference_time() {
        let (_dir, sweeper) = setup(Duration::from_secs(60), Duration::from_secs(3600)).await;
        aged_artifact(&sweeper.store, &sweeper.index, "a", 0).await;
        aged_artifact(&sweeper.store, &sweeper.index, "b", 0).await;

        let report = sweeper.sweep_at(Utc::now()).await;
        assert_eq!(report.deleted, 0);

        let later = Utc::now() + chrono::Duration::seconds(120);
        let report = sweeper.sweep_at(later).await;
        assert_eq!(report.deleted, 2);
        assert!(sweeper.index.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_missing_directory_is_contained() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::new(dir.path().join("gone"), "wav");
        let sweeper = RetentionSweeper::new(
            store,
            Arc::new(CacheIndex::new()),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );

        let report = sweeper.sweep_once().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.deleted, 0);
    }

    #[tokio::test]
    async fn test_run_sweeps_on_start_and_stops_mid_wait() {
        let (_dir, sweeper) = setup(Duration::from_secs(60), Duration::from_secs(3600)).await;
        let (_, old_path) = aged_artifact(&sweeper.store, &sweeper.index, "old", 600).await;
        let store = sweeper.store.clone();
        let index = Arc::clone(&sweeper.index);
        let mut state = sweeper.subscribe();
        let token = CancellationToken::new();

        let task = tokio::spawn(sweeper.run(token.clone()));

        // First pass completes, then the sweeper parks for an hour
        loop {
            state.changed().await.unwrap();
            if *state.borrow_and_update() == SweeperState::Idle {
                break;
            }
        }
        assert!(!store.exists(&old_path).await);
        assert!(index.is_empty());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("sweeper should stop promptly")
            .unwrap();
        assert_eq!(*state.borrow(), SweeperState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_during_sweep_keeps_index_consistent() {
        let (_dir, sweeper) = setup(Duration::from_secs(60), Duration::from_secs(3600)).await;
        let mut seeded = Vec::new();
        for i in 0..40 {
            let text = format!("expired-{}", i);
            seeded.push(aged_artifact(&sweeper.store, &sweeper.index, &text, 600).await);
        }
        let store = sweeper.store.clone();
        let index = Arc::clone(&sweeper.index);
        let mut state = sweeper.subscribe();
        let token = CancellationToken::new();

        let task = tokio::spawn(sweeper.run(token.clone()));

        // Stop as soon as the first deletion lands
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let mut any_gone = false;
                for (_, path) in &seeded {
                    if !store.exists(path).await {
                        any_gone = true;
                        break;
                    }
                }
                if any_gone {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("sweeper should delete something");
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("sweeper should stop promptly")
            .unwrap();
        assert_eq!(*state.borrow_and_update(), SweeperState::Stopped);

        let keys = index.keys();
        for (fp, path) in &seeded {
            assert_eq!(
                store.exists(path).await,
                keys.contains(fp),
                "file and index disagree for {}",
                fp
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sweep_skips_artifact_being_regenerated() {
        let (_dir, sweeper) = setup(Duration::from_secs(60), Duration::from_secs(3600)).await;
        let (fp, path) = aged_artifact(&sweeper.store, &sweeper.index, "Hello", 600).await;
        // Index forgot the file (cleared or restarted) but the old bytes remain
        sweeper.index.remove(&fp);

        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let generation = {
            let index = Arc::clone(&sweeper.index);
            let store = sweeper.store.clone();
            let fp = fp.clone();
            tokio::spawn(async move {
                let target = fp.clone();
                index
                    .get_or_compute(&fp, move || async move {
                        let _ = released.await;
                        store.write(&target, b"fresh".to_vec()).await
                    })
                    .await
            })
        };
        while !sweeper.index.is_generating(&fp) {
            tokio::task::yield_now().await;
        }

        let report = sweeper.sweep_once().await;
        assert_eq!(report.deleted, 0);
        assert!(sweeper.store.exists(&path).await);

        release.send(()).unwrap();
        let (entry, _) = generation.await.unwrap().unwrap();
        assert_eq!(entry.path, path);
        assert!(sweeper.store.exists(&path).await);
        assert_eq!(sweeper.sweep_once().await.deleted, 0);
    }
}
