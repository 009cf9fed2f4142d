//! Path-addressed blob storage
//!
//! Stores uploaded bytes on disk under caller-chosen relative paths,
//! e.g. "blobs/{owner}/{suffix}_{name}". Paths are write-once: an
//! existing object is never overwritten.

use crate::error::{AppError, Result};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

/// Filesystem blob store
#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create a new blob store at the given root directory
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Initialize the blob store (create directory if needed)
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        tracing::info!("Blob store initialized at: {:?}", self.root);
        Ok(())
    }

    /// Write data at `key`. Fails with a conflict if the key is taken.
    ///
    /// The bytes go to a private temp file that is then hard-linked into
    /// place, so the existence check and the publish are one atomic step
    /// and readers never see a partial object.
    pub async fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.get_path(key)?;

        if path.exists() {
            return Err(AppError::Conflict(format!("Object already exists: {}", key)));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut temp_path = path.clone().into_os_string();
        temp_path.push(format!(".{}.tmp", Uuid::new_v4().simple()));
        let temp_path = PathBuf::from(temp_path);
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        let linked = fs::hard_link(&temp_path, &path).await;
        if let Err(e) = fs::remove_file(&temp_path).await {
            tracing::warn!("Failed to remove temp file {:?}: {}", temp_path, e);
        }
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(AppError::Conflict(format!("Object already exists: {}", key)));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!("Wrote blob: {} ({} bytes)", key, data.len());

        Ok(())
    }

    /// Read data from blob store
    pub async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.get_path(key)?;

        if !path.exists() {
            return Err(AppError::BlobStore(format!("Blob not found: {}", key)));
        }

        let mut file = fs::File::open(&path).await?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).await?;

        tracing::debug!("Read blob: {} ({} bytes)", key, data.len());

        Ok(data)
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.get_path(key)?;
        Ok(path.exists())
    }

    /// Delete a blob; deleting a missing blob is not an error
    pub async fn delete(&self, key: &str) -> Result<()> {
        let path = self.get_path(key)?;

        if !path.exists() {
            return Ok(());
        }

        fs::remove_file(&path).await?;

        tracing::debug!("Deleted blob: {}", key);

        Ok(())
    }

    /// Resolve a key to a file below the root, rejecting traversal
    fn get_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);

        let valid = !key.is_empty()
            && !key.ends_with(".tmp")
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !valid {
            return Err(AppError::Validation(format!("Invalid object path: {:?}", key)));
        }

        Ok(self.root.join(relative))
    }

    /// List every stored key, relative to the root, '/'-separated
    pub async fn list_all(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        self.scan_directory(&self.root, &mut keys).await?;
        keys.sort();
        Ok(keys)
    }

    fn scan_directory<'a>(
        &'a self,
        dir: &'a Path,
        keys: &'a mut Vec<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            if !dir.exists() {
                return Ok(());
            }

            let mut entries = fs::read_dir(dir).await?;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();

                if path.is_dir() {
                    self.scan_directory(&path, keys).await?;
                } else if path.is_file() {
                    if path.extension().is_some_and(|ext| ext == "tmp") {
                        continue;
                    }
                    if let Ok(relative) = path.strip_prefix(&self.root) {
                        let key = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy().into_owned())
                            .collect::<Vec<_>>()
                            .join("/");
                        keys.push(key);
                    }
                }
            }

            Ok(())
        })
    }

    /// Get blob store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}
