//! Files view

use super::{GalleryView, ListController, SessionAware};
use crate::database::FileRecord;
use crate::error::{AppError, Result};
use crate::repository::{sanitize_filename, Download, FilesRepository, Publishable};
use crate::session::{SessionContext, SessionState};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Write downloaded bytes into `dir` under the file's name, without
/// overwriting anything already there
pub async fn save_download(dir: &Path, download: &Download) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;

    let name = sanitize_filename(&download.file.name);
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
        _ => (name.clone(), String::new()),
    };

    let mut target = dir.join(&name);
    let mut n = 1;
    while tokio::fs::try_exists(&target).await? {
        target = dir.join(format!("{} ({}){}", stem, n, ext));
        n += 1;
    }

    tokio::fs::write(&target, &download.bytes).await?;
    tracing::info!("Saved {} to {:?}", download.file.name, target);
    Ok(target)
}

#[derive(Clone)]
pub struct FilesView {
    list: ListController<FileRecord>,
    repo: FilesRepository,
    gallery: Option<GalleryView>,
}

impl FilesView {
    pub fn new(session: SessionContext, repo: FilesRepository) -> Self {
        Self {
            list: ListController::owned("Files", session),
            repo,
            gallery: None,
        }
    }

    /// Files that stop being public also leave `gallery`
    pub fn with_gallery(mut self, gallery: GalleryView) -> Self {
        self.gallery = Some(gallery);
        self
    }

    async fn unpublish(&self, id: &str) {
        if let Some(gallery) = &self.gallery {
            gallery.forget(id).await;
        }
    }

    pub fn list(&self) -> &ListController<FileRecord> {
        &self.list
    }

    pub async fn refresh(&self) -> Result<()> {
        let repo = &self.repo;
        self.list
            .refresh(|owner| async move {
                match owner {
                    Some(owner) => repo.list(&owner).await,
                    None => Ok(Vec::new()),
                }
            })
            .await
    }

    /// Upload as the signed-in user, then re-sync the list
    pub async fn upload(&self, bytes: &[u8], name: &str, media_type: &str) -> Result<FileRecord> {
        let owner = self.list.require_user()?;
        let file = self
            .list
            .mutate(
                self.repo.upload(&owner, bytes, name, media_type),
                |cache, file| cache.insert_front(file.clone()),
            )
            .await?;

        if let Err(e) = self.refresh().await {
            tracing::debug!("Re-sync after upload failed: {}", e);
        }
        Ok(file)
    }

    /// Delete after the user confirmed
    pub async fn delete(&self, id: &str) -> Result<()> {
        let file = self.cached(id).await?;
        self.list
            .mutate(self.repo.delete(&file), |cache, _| {
                cache.remove(id);
            })
            .await?;
        self.unpublish(id).await;
        Ok(())
    }

    pub async fn toggle_visibility(&self, id: &str) -> Result<bool> {
        let file = self.cached(id).await?;
        let now_public = self
            .list
            .mutate(self.repo.toggle_visibility(&file), |cache, is_public| {
                cache.patch(id, |f| f.set_public(*is_public));
            })
            .await?;
        if !now_public {
            self.unpublish(id).await;
        }

        if let Err(e) = self.refresh().await {
            tracing::debug!("Re-sync after toggle failed: {}", e);
        }
        Ok(now_public)
    }

    pub async fn move_to_folder(&self, id: &str, folder_id: Option<&str>) -> Result<()> {
        let folder = folder_id.map(str::to_string);
        self.list
            .mutate(self.repo.move_to_folder(id, folder_id), |cache, _| {
                cache.patch(id, |f| f.folder_id = folder);
            })
            .await
    }

    /// Rows filed under a deleted folder are now unfiled
    pub async fn unfile(&self, folder_id: &str) {
        self.list
            .edit_cached(|cache| {
                let filed: Vec<String> = cache
                    .items()
                    .iter()
                    .filter(|item| item.folder_id.as_deref() == Some(folder_id))
                    .map(|item| item.id.clone())
                    .collect();
                for id in filed {
                    cache.patch(&id, |item| item.folder_id = None);
                }
            })
            .await;
    }

    /// Fetch a cached file's bytes and count the download
    pub async fn download(&self, id: &str) -> Result<Download> {
        let file = self.cached(id).await?;
        self.list
            .mutate(self.repo.download(&file), |cache, download| {
                cache.replace(download.file.clone());
            })
            .await
    }

    /// Download and save into `dir`
    pub async fn download_to(&self, id: &str, dir: &Path) -> Result<PathBuf> {
        let download = self.download(id).await?;
        save_download(dir, &download).await
    }

    pub async fn public_url(&self, id: &str) -> Result<String> {
        let file = self.cached(id).await?;
        Ok(self.repo.public_url(&file))
    }

    async fn cached(&self, id: &str) -> Result<FileRecord> {
        self.list
            .get(id)
            .await
            .ok_or_else(|| AppError::Authorization(format!("File not found: {}", id)))
    }
}

#[async_trait]
impl SessionAware for FilesView {
    async fn session_changed(&self, session: &SessionState) {
        if self.list.reset_for(session).await {
            if let Err(e) = self.refresh().await {
                tracing::warn!("Failed to load files: {}", e);
            }
        }
    }
}
