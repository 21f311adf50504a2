//! On-disk artifact store
//!
//! Directory layout:
//! ```text
//! <images_dir>/
//! ├── generated_<micros>_<suffix>.jpg    published image
//! ├── generated_<micros>_<suffix>.json   sidecar metadata (prompt)
//! └── .tmp-<random>                      in-flight write, never listed
//! ```
//!
//! Writes land in a temporary file, are fsynced, and are then published
//! with a hard link that fails if the final name already exists. A reader
//! therefore sees either the complete image or nothing.

use super::types::{Artifact, ArtifactId, IdClock, IMAGE_EXTENSION};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Bounded number of identifiers tried before giving up on a publish.
pub const MAX_PUBLISH_ATTEMPTS: usize = 8;

const TEMP_PREFIX: &str = ".tmp-";

type IdFactory = fn(&IdClock) -> ArtifactId;

fn mint_id(clock: &IdClock) -> ArtifactId {
    ArtifactId::generate(clock.next_micros())
}

/// Store for generated images backed by a single directory
pub struct ArtifactStore {
    dir: PathBuf,
    clock: IdClock,
    id_factory: IdFactory,
    #[cfg(test)]
    stuck: std::sync::Mutex<std::collections::HashSet<ArtifactId>>,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl ArtifactStore {
    /// Open the store at `dir`, creating it if needed and sweeping leftovers
    /// from interrupted writes.
    ///
    /// The id clock is advanced past the newest artifact already on disk, so
    /// new artifacts always rank newest even if the wall clock is behind.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::storage("create_dir", &dir, e))?;

        let store = Self {
            dir,
            clock: IdClock::new(),
            id_factory: mint_id,
            #[cfg(test)]
            stuck: Default::default(),
        };
        store.sweep_leftovers().await?;
        Ok(store)
    }

    #[cfg(test)]
    fn with_id_factory(mut self, factory: IdFactory) -> Self {
        self.id_factory = factory;
        self
    }

    /// Make every later delete of `id` fail with a storage error.
    #[cfg(test)]
    pub(crate) fn fail_deletes_of(&self, id: &ArtifactId) {
        self.stuck.lock().unwrap().insert(id.clone());
    }

    /// Directory holding the artifacts
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Persist `payload` as a new artifact.
    ///
    /// The artifact is visible to `list`/`read` only once this returns `Ok`.
    pub async fn create(&self, payload: &[u8], prompt: &str) -> Result<Artifact> {
        let tmp = self.write_temp(payload).await?;
        let published = self.publish(&tmp).await;

        if let Err(e) = tokio::fs::remove_file(&tmp).await {
            tracing::warn!("Failed to remove temp file {}: {}", tmp.display(), e);
        }

        let id = published?;
        self.sync_dir().await;

        let created_at = id
            .created_at()
            .ok_or_else(|| Error::Internal(format!("minted id {} has no timestamp", id)))?;
        let artifact = Artifact {
            id,
            created_at,
            size_bytes: payload.len() as u64,
            source_prompt: Some(prompt.to_string()),
        };

        // Metadata is observability only; the image is already published.
        if let Err(e) = self.write_meta(&artifact).await {
            tracing::warn!(id = %artifact.id, "Failed to write artifact metadata: {}", e);
        }

        tracing::debug!(
            id = %artifact.id,
            size = artifact.size_bytes,
            "Artifact published"
        );
        Ok(artifact)
    }

    /// Remove an artifact
    pub async fn delete(&self, id: &str) -> Result<()> {
        let (id, _) = Self::resolve(id)?;
        self.delete_id(&id).await
    }

    pub(crate) async fn delete_id(&self, id: &ArtifactId) -> Result<()> {
        let path = self.image_path(id);
        #[cfg(test)]
        {
            if self.stuck.lock().unwrap().contains(id) {
                return Err(Error::storage(
                    "delete",
                    path,
                    std::io::Error::from(ErrorKind::PermissionDenied),
                ));
            }
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(id.to_string()));
            }
            Err(e) => return Err(Error::storage("delete", path, e)),
        }

        let meta = self.meta_path(id);
        match tokio::fs::remove_file(&meta).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove metadata {}: {}", meta.display(), e),
        }

        self.sync_dir().await;
        tracing::debug!(id = %id, "Artifact deleted");
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read the full payload of an artifact
    pub async fn read(&self, id: &str) -> Result<Vec<u8>> {
        let (id, _) = Self::resolve(id)?;
        let path = self.image_path(&id);
        tokio::fs::read(&path)
            .await
            .map_err(|e| not_found_or_storage(e, "read", &path, &id))
    }

    /// Open an artifact for streaming, returning the handle and its metadata
    pub async fn open_artifact(&self, id: &str) -> Result<(tokio::fs::File, Artifact)> {
        let (id, created_at) = Self::resolve(id)?;
        let path = self.image_path(&id);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_storage(e, "open", &path, &id))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| Error::storage("stat", &path, e))?;
        if !metadata.is_file() {
            return Err(Error::NotFound(id.to_string()));
        }

        let source_prompt = self.read_prompt(&id).await;
        let artifact = Artifact {
            id,
            created_at,
            size_bytes: metadata.len(),
            source_prompt,
        };
        Ok((file, artifact))
    }

    /// Metadata for a single artifact
    pub async fn get(&self, id: &str) -> Result<Artifact> {
        let (id, created_at) = Self::resolve(id)?;
        let path = self.image_path(&id);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_storage(e, "stat", &path, &id))?;
        if !metadata.is_file() {
            return Err(Error::NotFound(id.to_string()));
        }
        let source_prompt = self.read_prompt(&id).await;
        Ok(Artifact {
            id,
            created_at,
            size_bytes: metadata.len(),
            source_prompt,
        })
    }

    /// Snapshot of all artifacts, newest first
    pub async fn list(&self) -> Result<Vec<Artifact>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::storage("list", &self.dir, e))?;

        let mut artifacts = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::storage("list", &self.dir, e))?
        {
            let file_name = entry.file_name();
            let Some(id) = file_name.to_str().and_then(published_id) else {
                continue;
            };
            let Some(created_at) = id.created_at() else {
                continue;
            };

            let metadata = match entry.metadata().await {
                Ok(m) => m,
                // Deleted between read_dir and stat.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::storage("stat", entry.path(), e)),
            };
            if !metadata.is_file() {
                continue;
            }

            let source_prompt = self.read_prompt(&id).await;
            artifacts.push(Artifact {
                id,
                created_at,
                size_bytes: metadata.len(),
                source_prompt,
            });
        }

        artifacts.sort_by(Artifact::newest_first);
        Ok(artifacts)
    }

    /// Number of artifacts currently stored
    pub async fn count(&self) -> Result<usize> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::storage("list", &self.dir, e))?;
        let mut count = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::storage("list", &self.dir, e))?
        {
            let minted = entry
                .file_name()
                .to_str()
                .and_then(published_id)
                .is_some_and(|id| id.created_at().is_some());
            if !minted {
                continue;
            }
            match entry.file_type().await {
                Ok(kind) if kind.is_file() => count += 1,
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::storage("stat", entry.path(), e)),
            }
        }
        Ok(count)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Validate untrusted input and require the minted layout.
    ///
    /// Never touches the filesystem.
    fn resolve(raw: &str) -> Result<(ArtifactId, DateTime<Utc>)> {
        let id = ArtifactId::parse(raw)?;
        match id.created_at() {
            Some(created_at) => Ok((id, created_at)),
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    fn image_path(&self, id: &ArtifactId) -> PathBuf {
        self.dir.join(id.filename())
    }

    fn meta_path(&self, id: &ArtifactId) -> PathBuf {
        self.dir.join(id.meta_filename())
    }

    fn temp_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}{:016x}", TEMP_PREFIX, rand::random::<u64>()))
    }

    /// Write `data` to a fresh temp file and fsync it.
    async fn write_temp(&self, data: &[u8]) -> Result<PathBuf> {
        let tmp = self.temp_path();
        if let Err(e) = write_synced(&tmp, data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::storage("write", tmp, e));
        }
        Ok(tmp)
    }

    /// Link the temp file under a freshly minted name, retrying on collision.
    async fn publish(&self, tmp: &Path) -> Result<ArtifactId> {
        for attempt in 1..=MAX_PUBLISH_ATTEMPTS {
            let id = (self.id_factory)(&self.clock);
            let target = self.image_path(&id);
            match tokio::fs::hard_link(tmp, &target).await {
                Ok(()) => return Ok(id),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tracing::debug!(id = %id, attempt, "Identifier collision, regenerating");
                }
                Err(e) => return Err(Error::storage("publish", target, e)),
            }
        }

        Err(Error::storage(
            "publish",
            &self.dir,
            std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!(
                    "no free identifier after {} attempts",
                    MAX_PUBLISH_ATTEMPTS
                ),
            ),
        ))
    }

    async fn write_meta(&self, artifact: &Artifact) -> Result<()> {
        let json = serde_json::to_vec_pretty(artifact)
            .map_err(|e| Error::Internal(format!("serialize metadata: {}", e)))?;
        let tmp = self.write_temp(&json).await?;
        let target = self.meta_path(&artifact.id);
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::storage("rename", target, e));
        }
        Ok(())
    }

    async fn read_prompt(&self, id: &ArtifactId) -> Option<String> {
        let path = self.meta_path(id);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    tracing::debug!("Failed to read metadata {}: {}", path.display(), e);
                }
                return None;
            }
        };
        match serde_json::from_slice::<Artifact>(&data) {
            Ok(meta) => meta.source_prompt,
            Err(e) => {
                tracing::debug!("Failed to parse metadata {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Remove temp files from crashed writes and metadata whose image is gone,
    /// and seed the id clock from published artifacts.
    async fn sweep_leftovers(&self) -> Result<()> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| Error::storage("list", &self.dir, e))?;

        let mut removed = 0usize;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::storage("list", &self.dir, e))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };

            if let Some(created_at) = published_id(name).and_then(|id| id.created_at()) {
                self.clock.observe(created_at.timestamp_micros());
                continue;
            }

            let stale = if name.starts_with(TEMP_PREFIX) {
                true
            } else if let Some(stem) = name.strip_suffix(".json") {
                match ArtifactId::parse(stem) {
                    Ok(id) if id.created_at().is_some() => {
                        !tokio::fs::try_exists(self.image_path(&id))
                            .await
                            .unwrap_or(true)
                    }
                    _ => false,
                }
            } else {
                false
            };

            if stale {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => tracing::warn!("Failed to remove leftover {}: {}", name, e),
                }
            }
        }

        if removed > 0 {
            tracing::info!(
                dir = %self.dir.display(),
                removed,
                "Removed leftovers from interrupted writes"
            );
        }
        Ok(())
    }

    async fn sync_dir(&self) {
        #[cfg(unix)]
        {
            match tokio::fs::File::open(&self.dir).await {
                Ok(dir) => {
                    if let Err(e) = dir.sync_all().await {
                        tracing::debug!("Failed to sync {}: {}", self.dir.display(), e);
                    }
                }
                Err(e) => tracing::debug!("Failed to open {}: {}", self.dir.display(), e),
            }
        }
    }
}

/// Identifier of a published image filename, if it is one
fn published_id(name: &str) -> Option<ArtifactId> {
    let stem = name.strip_suffix(IMAGE_EXTENSION)?.strip_suffix('.')?;
    ArtifactId::parse(stem).ok()
}

fn not_found_or_storage(
    e: std::io::Error,
    op: &'static str,
    path: &Path,
    id: &ArtifactId,
) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::NotFound(id.to_string())
    } else {
        Error::storage(op, path, e)
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}
