//! Disk-backed artifact cache with single-flight generation
//!
//! Expensive, deterministic generation work (text + language in, binary
//! artifact out) is cached on disk under a content fingerprint, tracked by
//! an in-memory index, and reclaimed by a background retention sweeper once
//! artifacts age past a configured window.

mod cache;
mod error;
mod index;
mod key;
mod lifecycle;
mod store;
mod sweeper;
mod synth;
mod types;

pub use cache::{validate_request, ArtifactCache, Generated, DEFAULT_MAX_TEXT_CHARS};
pub use error::{CacheError, Result};
pub use index::CacheIndex;
pub use key::{fingerprint, Fingerprint, FINGERPRINT_LEN};
pub use lifecycle::{start_sweeper, ShutdownOutcome, SweeperHandle};
pub use store::ArtifactStore;
pub use sweeper::RetentionSweeper;
pub use synth::Synthesizer;
pub use types::{CacheEntry, CacheStats, CacheStatus, StoredArtifact, SweepReport, SweeperState};
