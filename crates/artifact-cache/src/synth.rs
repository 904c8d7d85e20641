//! Boundary to the external speech synthesis engine

use crate::error::Result;
use async_trait::async_trait;

/// Produces the artifact bytes for a (text, language) pair.
///
/// Calls may take seconds. The cache never cancels one once started, and
/// implementations report failures as [`crate::CacheError::Synthesis`].
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>>;
}
