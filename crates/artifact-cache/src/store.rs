//! File-based artifact storage keyed by fingerprint

use crate::error::{CacheError, Result};
use crate::key::Fingerprint;
use crate::types::StoredArtifact;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

/// Prefix of in-progress writes; such files are never listed
const TEMP_PREFIX: &str = ".partial-";

/// A directory of artifacts named `<fingerprint>.<extension>`
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    extension: String,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    /// Ensure the storage directory exists
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CacheError::storage(&self.root, e))?;
        info!(root = ?self.root, "Artifact store initialized");
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Where the artifact for `fp` lives once published
    pub fn artifact_path(&self, fp: &Fingerprint) -> PathBuf {
        self.root.join(format!("{}.{}", fp, self.extension))
    }

    /// Write `data` for `fp` and publish it atomically.
    ///
    /// Bytes go to a temp file in the same directory, are synced, then
    /// renamed over the final path. Readers see the old artifact, the new
    /// one, or nothing; never a partial file. On failure the temp file is
    /// removed when it drops.
    pub async fn write(&self, fp: &Fingerprint, data: Vec<u8>) -> Result<PathBuf> {
        let root = self.root.clone();
        let target = self.artifact_path(fp);
        let published = target.clone();
        let size = data.len();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::Builder::new()
                .prefix(TEMP_PREFIX)
                .tempfile_in(&root)
                .map_err(|e| CacheError::storage(&root, e))?;
            tmp.write_all(&data)
                .and_then(|_| tmp.as_file().sync_all())
                .map_err(|e| CacheError::storage(tmp.path(), e))?;
            tmp.persist(&target)
                .map_err(|e| CacheError::storage(&target, e.error))?;
            Ok(())
        })
        .await
        .map_err(|_| CacheError::Aborted)??;

        debug!(path = ?published, size, "Published artifact");
        Ok(published)
    }

    pub async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    /// The fingerprint an artifact was published under, if `path` names one
    pub fn fingerprint_of(&self, path: &Path) -> Option<Fingerprint> {
        if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
            return None;
        }
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(Fingerprint::parse)
    }

    /// Current modification time of an artifact, `None` if it is gone
    pub async fn modified(&self, path: &Path) -> Result<Option<DateTime<Utc>>> {
        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::storage(path, e)),
        };
        metadata
            .modified()
            .map(|modified| Some(DateTime::<Utc>::from(modified)))
            .map_err(|e| CacheError::storage(path, e))
    }

    /// Delete an artifact. Returns `false` if it was already gone.
    pub async fn delete(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::storage(path, e)),
        }
    }

    /// Stream every artifact with its modification time.
    ///
    /// The directory is read incrementally. Temp files, foreign extensions,
    /// and subdirectories are skipped, as are files that disappear between
    /// the directory read and the stat.
    pub async fn list_all(&self) -> Result<impl Stream<Item = Result<StoredArtifact>> + Send + 'static> {
        let dir = fs::read_dir(&self.root)
            .await
            .map_err(|e| CacheError::storage(&self.root, e))?;
        let root = self.root.clone();
        let extension = self.extension.clone();

        Ok(stream::unfold(Some(dir), move |state| {
            let root = root.clone();
            let extension = extension.clone();
            async move {
                let mut dir = state?;
                loop {
                    let entry = match dir.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => return None,
                        Err(e) => return Some((Err(CacheError::storage(&root, e)), None)),
                    };

                    let path = entry.path();
                    if !is_artifact_name(&path, &extension) {
                        continue;
                    }

                    let metadata = match entry.metadata().await {
                        Ok(metadata) => metadata,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                        Err(e) => return Some((Err(CacheError::storage(&path, e)), Some(dir))),
                    };
                    if !metadata.is_file() {
                        continue;
                    }

                    let item = metadata
                        .modified()
                        .map(|modified| StoredArtifact {
                            path: path.clone(),
                            modified: DateTime::<Utc>::from(modified),
                        })
                        .map_err(|e| CacheError::storage(&path, e));
                    return Some((item, Some(dir)));
                }
            }
        }))
    }

    /// Delete every artifact regardless of age
    pub async fn delete_all(&self) -> Result<usize> {
        let listing = self.list_all().await?;
        futures::pin_mut!(listing);

        let mut deleted = 0;
        while let Some(artifact) = listing.next().await {
            if self.delete(&artifact?.path).await? {
                deleted += 1;
            }
        }

        info!(deleted, "Deleted all artifacts");
        Ok(deleted)
    }
}

fn is_artifact_name(path: &Path, extension: &str) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.starts_with(TEMP_PREFIX) && path.extension().and_then(|e| e.to_str()) == Some(extension)
}
