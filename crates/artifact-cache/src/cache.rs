//! Request path: validate, fingerprint, generate once, publish, serve

use crate::error::{CacheError, Result};
use crate::index::CacheIndex;
use crate::key::{fingerprint, Fingerprint};
use crate::store::ArtifactStore;
use crate::sweeper::RetentionSweeper;
use crate::synth::Synthesizer;
use crate::types::{CacheStats, CacheStatus};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// Default cap on request text, in characters
pub const DEFAULT_MAX_TEXT_CHARS: usize = 5000;

/// Result of a generate call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated {
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
    pub status: CacheStatus,
}

/// Reject input that must never reach fingerprinting
pub fn validate_request(text: &str, language: &str, max_text_chars: usize) -> Result<()> {
    if text.trim().is_empty() {
        return Err(CacheError::Validation("Text cannot be empty".to_string()));
    }
    if language.trim().is_empty() {
        return Err(CacheError::Validation("Language cannot be empty".to_string()));
    }
    if text.chars().count() > max_text_chars {
        return Err(CacheError::Validation(format!(
            "Text exceeds {} characters",
            max_text_chars
        )));
    }
    Ok(())
}

/// Artifact store, index, and synthesizer wired together
pub struct ArtifactCache {
    store: ArtifactStore,
    index: Arc<CacheIndex>,
    synthesizer: Arc<dyn Synthesizer>,
    max_text_chars: usize,
}

impl ArtifactCache {
    pub fn new(store: ArtifactStore, synthesizer: Arc<dyn Synthesizer>) -> Self {
        Self {
            store,
            index: Arc::new(CacheIndex::new()),
            synthesizer,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
        }
    }

    pub fn with_max_text_chars(mut self, max_text_chars: usize) -> Self {
        self.max_text_chars = max_text_chars;
        self
    }

    pub async fn init(&self) -> Result<()> {
        self.store.init().await
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn index(&self) -> &Arc<CacheIndex> {
        &self.index
    }

    /// A sweeper over this cache's store and index
    pub fn sweeper(&self, max_age: Duration, interval: Duration) -> RetentionSweeper {
        RetentionSweeper::new(self.store.clone(), Arc::clone(&self.index), max_age, interval)
    }

    /// Produce (or reuse) the artifact for a (text, language) pair.
    ///
    /// A failure to store the synthesized bytes is reported as a synthesis
    /// failure, since no usable artifact exists either way.
    pub async fn generate(&self, text: &str, language: &str) -> Result<Generated> {
        validate_request(text, language, self.max_text_chars)?;
        let fp = fingerprint(text, language);

        let synthesizer = Arc::clone(&self.synthesizer);
        let store = self.store.clone();
        let job_fp = fp.clone();
        let text = text.to_string();
        let language = language.to_string();

        let result = self
            .index
            .get_or_compute(&fp, move || async move {
                let audio = synthesizer.synthesize(&text, &language).await?;
                if audio.is_empty() {
                    return Err(CacheError::Synthesis(
                        "engine returned no audio".to_string(),
                    ));
                }
                store
                    .write(&job_fp, audio)
                    .await
                    .map_err(|e| CacheError::Synthesis(format!("failed to store artifact: {}", e)))
            })
            .await;

        match result {
            Ok((entry, status)) => {
                debug!(fingerprint = %fp, status = status.as_header(), "Artifact ready");
                Ok(Generated {
                    fingerprint: fp,
                    path: entry.path,
                    status,
                })
            }
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "Generation failed");
                Err(e)
            }
        }
    }

    /// Generate and read the artifact bytes.
    ///
    /// If the artifact is swept between generation and the read, it is
    /// generated once more.
    pub async fn fetch(&self, text: &str, language: &str) -> Result<(Generated, Vec<u8>)> {
        let generated = self.generate(text, language).await?;
        match fs::read(&generated.path).await {
            Ok(bytes) => Ok((generated, bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(fingerprint = %generated.fingerprint, "Artifact vanished before read, regenerating");
                let generated = self.generate(text, language).await?;
                let bytes = fs::read(&generated.path)
                    .await
                    .map_err(|e| CacheError::storage(&generated.path, e))?;
                Ok((generated, bytes))
            }
            Err(e) => Err(CacheError::storage(&generated.path, e)),
        }
    }

    /// Forget every index entry; artifacts stay on disk
    pub fn clear(&self) -> usize {
        let cleared = self.index.clear();
        info!(cleared, "Cache index cleared");
        cleared
    }

    /// Delete every artifact and forget every entry
    pub async fn cleanup(&self) -> Result<usize> {
        let deleted = self.store.delete_all().await?;
        self.index.clear();
        Ok(deleted)
    }

    pub fn stats(&self) -> CacheStats {
        self.index.stats()
    }
}
