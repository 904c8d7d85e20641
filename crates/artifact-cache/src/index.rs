//! In-memory index of published artifacts with single-flight generation

use crate::error::{CacheError, Result};
use crate::key::Fingerprint;
use crate::types::{CacheEntry, CacheStats, CacheStatus};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::fs;
use tracing::{debug, warn};

/// A generation shared by every caller that asked for the same fingerprint
type Flight = Shared<BoxFuture<'static, Result<CacheEntry>>>;

type EntryMap = HashMap<Fingerprint, CacheEntry>;
type FlightMap = HashMap<Fingerprint, Flight>;

/// Maps fingerprints to published artifacts.
///
/// Entry locks are held only for map operations, never across I/O or an
/// await. Lock order is always flights then entries.
pub struct CacheIndex {
    /// Published artifacts by fingerprint
    entries: Arc<RwLock<EntryMap>>,
    /// Generations still running, shared by every waiter
    in_flight: Arc<Mutex<FlightMap>>,
    /// Requests served from an existing artifact
    hits: AtomicU64,
    /// Requests that started or joined a generation
    misses: AtomicU64,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get the entry for `fp` if its artifact still exists on disk.
    ///
    /// An entry whose file is gone is purged and `None` is returned. The
    /// purge only removes the exact entry that was checked, so a replacement
    /// inserted meanwhile survives and is returned instead.
    pub async fn lookup(&self, fp: &Fingerprint) -> Option<CacheEntry> {
        let entry = read(&self.entries).get(fp).cloned()?;

        if fs::try_exists(&entry.path).await.unwrap_or(false) {
            return Some(entry);
        }

        let mut entries = write(&self.entries);
        match entries.get(fp) {
            Some(current) if *current == entry => {
                entries.remove(fp);
                warn!(fingerprint = %fp, path = ?entry.path, "Artifact missing, purged stale entry");
                None
            }
            Some(current) => Some(current.clone()),
            None => None,
        }
    }

    /// Insert or replace the entry for `fp`
    pub fn insert(&self, fp: Fingerprint, path: PathBuf) -> CacheEntry {
        let entry = CacheEntry {
            fingerprint: fp.clone(),
            path,
            created_at: Utc::now(),
        };
        write(&self.entries).insert(fp, entry.clone());
        entry
    }

    pub fn remove(&self, fp: &Fingerprint) -> bool {
        write(&self.entries).remove(fp).is_some()
    }

    /// Remove every entry pointing at `path`, returning how many went
    pub fn remove_by_artifact(&self, path: &Path) -> usize {
        let mut entries = write(&self.entries);
        let before = entries.len();
        entries.retain(|_, entry| entry.path != path);
        before - entries.len()
    }

    /// Drop every entry without touching the files behind them
    pub fn clear(&self) -> usize {
        let mut entries = write(&self.entries);
        let cleared = entries.len();
        entries.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.entries).is_empty()
    }

    pub fn keys(&self) -> Vec<Fingerprint> {
        let mut keys: Vec<_> = read(&self.entries).keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Generations currently running
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// Whether a generation for `fp` is running right now
    pub fn is_generating(&self, fp: &Fingerprint) -> bool {
        lock(&self.in_flight).contains_key(fp)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            in_flight: self.in_flight(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Return the entry for `fp`, generating it with `compute` on a miss.
    ///
    /// Concurrent callers for the same fingerprint share one generation and
    /// all observe its outcome, success or failure. The generation runs on
    /// its own task, so a caller going away does not cancel it for the
    /// others. The entry is published before the flight is retired, so a
    /// caller arriving afterwards sees a hit.
    pub async fn get_or_compute<F, Fut>(
        &self,
        fp: &Fingerprint,
        compute: F,
    ) -> Result<(CacheEntry, CacheStatus)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PathBuf>> + Send + 'static,
    {
        let mut compute = Some(compute);
        loop {
            if let Some(entry) = self.lookup(fp).await {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fp, "Cache hit");
                return Ok((entry, CacheStatus::Hit));
            }

            let flight = {
                let mut in_flight = lock(&self.in_flight);
                let running = in_flight.get(fp).cloned();
                match running {
                    Some(flight) => {
                        debug!(fingerprint = %fp, "Joining in-flight generation");
                        Some(flight)
                    }
                    // Published between our lookup and taking the flight lock;
                    // go round again so the file is checked before serving it
                    None if read(&self.entries).contains_key(fp) => None,
                    None => {
                        let Some(compute) = compute.take() else {
                            return Err(CacheError::Aborted);
                        };
                        debug!(fingerprint = %fp, "Cache miss, starting generation");
                        let flight = self.launch(fp.clone(), compute());
                        in_flight.insert(fp.clone(), flight.clone());
                        Some(flight)
                    }
                }
            };

            if let Some(flight) = flight {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return flight.await.map(|entry| (entry, CacheStatus::Miss));
            }
        }
    }

    fn launch<Fut>(&self, fp: Fingerprint, work: Fut) -> Flight
    where
        Fut: Future<Output = Result<PathBuf>> + Send + 'static,
    {
        let entries = Arc::clone(&self.entries);
        let retire = FlightGuard {
            fingerprint: fp.clone(),
            in_flight: Arc::clone(&self.in_flight),
        };

        let task = tokio::spawn(async move {
            let _retire = retire;
            let path = work.await?;
            let entry = CacheEntry {
                fingerprint: fp.clone(),
                path,
                created_at: Utc::now(),
            };
            write(&entries).insert(fp, entry.clone());
            Ok::<_, CacheError>(entry)
        });

        async move {
            task.await.unwrap_or_else(|e| {
                warn!(error = %e, "Generation task did not complete");
                Err(CacheError::Aborted)
            })
        }
        .boxed()
        .shared()
    }
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self::new()
    }
}

/// Retires a flight when its task finishes, panics, or is aborted
struct FlightGuard {
    fingerprint: Fingerprint,
    in_flight: Arc<Mutex<FlightMap>>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.fingerprint);
    }
}

// Critical sections never panic midway, so a poisoned lock still guards
// consistent data.
fn read(lock: &RwLock<EntryMap>) -> RwLockReadGuard<'_, EntryMap> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write(lock: &RwLock<EntryMap>) -> RwLockWriteGuard<'_, EntryMap> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

fn lock(mutex: &Mutex<FlightMap>) -> MutexGuard<'_, FlightMap> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
