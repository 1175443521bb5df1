//! Filesystem artifact storage.
//!
//! Artifacts sit flat under one directory, named by their cache filename:
//!
//! ```text
//! api-cache/
//! ├── Instagram0a1b2c3d.jpg
//! ├── TikTok9f8e7d6c.mp4
//! └── TikTok9f8e7d6c.mp4.tmp   (write in progress)
//! ```
//!
//! Writes go to `{filename}.tmp` and are renamed into place, so readers never
//! observe a partial artifact.

use crate::ArtifactStorage;
use meridian_error::{MeridianResult, StorageError, StorageErrorKind};
use std::path::{Path, PathBuf};

const TMP_SUFFIX: &str = ".tmp";

/// Filesystem storage backend.
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    base_path: PathBuf,
}

impl FileSystemStorage {
    /// Create a new filesystem storage backend.
    ///
    /// Creates the base directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created or accessed.
    #[tracing::instrument(skip(base_path))]
    pub fn new(base_path: impl Into<PathBuf>) -> MeridianResult<Self> {
        let base_path = base_path.into();

        std::fs::create_dir_all(&base_path).map_err(|e| {
            StorageError::new(StorageErrorKind::DirectoryCreation(format!(
                "{}: {}",
                base_path.display(),
                e
            )))
        })?;

        tracing::info!(path = %base_path.display(), "Created filesystem storage");
        Ok(Self { base_path })
    }

    /// Root directory of the cache.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a filename to its path, rejecting names that would escape the
    /// cache directory.
    fn path_for(&self, filename: &str) -> MeridianResult<PathBuf> {
        let valid = !filename.is_empty()
            && !filename.contains(['/', '\\'])
            && filename != "."
            && filename != ".."
            && !filename.ends_with(TMP_SUFFIX);
        if !valid {
            return Err(StorageError::new(StorageErrorKind::InvalidKey(filename.to_string())).into());
        }
        Ok(self.base_path.join(filename))
    }
}

#[async_trait::async_trait]
impl ArtifactStorage for FileSystemStorage {
    #[tracing::instrument(skip(self, data), fields(size = data.len()))]
    async fn store(&self, filename: &str, data: &[u8]) -> MeridianResult<()> {
        let path = self.path_for(filename)?;
        let temp_path = self.base_path.join(format!("{}{}", filename, TMP_SUFFIX));

        tokio::fs::write(&temp_path, data).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileWrite(format!(
                "{}: {}",
                temp_path.display(),
                e
            )))
        })?;

        tokio::fs::rename(&temp_path, &path).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileWrite(format!(
                "rename {} to {}: {}",
                temp_path.display(),
                path.display(),
                e
            )))
        })?;

        tracing::debug!(path = %path.display(), size = data.len(), "Stored artifact");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn retrieve(&self, filename: &str) -> MeridianResult<Vec<u8>> {
        let path = self.path_for(filename)?;

        let data = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::new(StorageErrorKind::NotFound(filename.to_string()))
            } else {
                StorageError::new(StorageErrorKind::FileRead(format!(
                    "{}: {}",
                    path.display(),
                    e
                )))
            }
        })?;

        tracing::debug!(path = %path.display(), size = data.len(), "Retrieved artifact");
        Ok(data)
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, filename: &str) -> MeridianResult<bool> {
        let path = self.path_for(filename)?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Deleted artifact");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::new(StorageErrorKind::FileWrite(format!(
                "delete {}: {}",
                path.display(),
                e
            )))
            .into()),
        }
    }

    async fn exists(&self, filename: &str) -> MeridianResult<bool> {
        let path = self.path_for(filename)?;
        Ok(tokio::fs::try_exists(path).await.unwrap_or(false))
    }

    async fn list(&self) -> MeridianResult<Vec<String>> {
        let mut dir = tokio::fs::read_dir(&self.base_path).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileRead(format!(
                "{}: {}",
                self.base_path.display(),
                e
            )))
        })?;

        let mut names = Vec::new();
        loop {
            let entry = dir.next_entry().await.map_err(|e| {
                StorageError::new(StorageErrorKind::FileRead(format!(
                    "{}: {}",
                    self.base_path.display(),
                    e
                )))
            })?;
            let Some(entry) = entry else { break };
            if let Some(name) = entry.file_name().to_str() {
                if !name.ends_with(TMP_SUFFIX) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}
