//! Cache types

use crate::key::Fingerprint;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Index record for a published artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Whether a request was served from the index or had to generate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_header(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// One artifact found while scanning the store
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

/// Statistics about the cache
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Outcome of one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Observable state of the retention sweeper
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
    Idle,
    Scanning,
    Stopping,
    Stopped,
}
