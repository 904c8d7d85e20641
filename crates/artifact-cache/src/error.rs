//! Error types for the artifact cache

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors produced by the cache, store, and synthesizer boundary.
///
/// Cloneable so a single failed generation can be handed to every caller
/// that was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The request was rejected before fingerprinting
    #[error("Validation error: {0}")]
    Validation(String),

    /// The synthesizer failed, or its output could not be stored
    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    /// Filesystem failure on a specific path
    #[error("Storage error at {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// The generation task was torn down before it produced a result
    #[error("Generation task aborted")]
    Aborted,
}

impl CacheError {
    pub fn storage(path: impl AsRef<Path>, source: io::Error) -> Self {
        CacheError::Storage {
            path: path.as_ref().to_path_buf(),
            source: Arc::new(source),
        }
    }

    /// True for caller mistakes, as opposed to failures on our side
    pub fn is_validation(&self) -> bool {
        matches!(self, CacheError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = CacheError::Validation("Text cannot be empty".to_string());
        assert_eq!(format!("{}", err), "Validation error: Text cannot be empty");
        assert!(err.is_validation());
    }

    #[test]
    fn test_synthesis_error_display() {
        let err = CacheError::Synthesis("engine unavailable".to_string());
        assert_eq!(format!("{}", err), "Synthesis failed: engine unavailable");
        assert!(!err.is_validation());
    }

    #[test]
    fn test_storage_error_keeps_source() {
        let err = CacheError::storage(
            "/tmp/out/abc.wav",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(format!("{}", err).contains("abc.wav"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_is_clone() {
        let err = CacheError::storage("/x", io::Error::other("boom"));
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
