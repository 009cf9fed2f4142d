//! Public gallery view
//!
//! Lists every public file without owner scoping. It works signed out
//! and re-fetches on every mount and after each download so a file
//! un-published meanwhile drops out of the list.

use super::files::save_download;
use super::{ListController, SessionAware};
use crate::database::FileRecord;
use crate::error::{AppError, Result};
use crate::repository::{Download, FilesRepository};
use crate::session::{SessionContext, SessionState};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct GalleryView {
    list: ListController<FileRecord>,
    repo: FilesRepository,
}

impl GalleryView {
    pub fn new(session: SessionContext, repo: FilesRepository) -> Self {
        Self {
            list: ListController::public("Gallery", session),
            repo,
        }
    }

    pub fn list(&self) -> &ListController<FileRecord> {
        &self.list
    }

    /// Show the gallery again. The list is always re-fetched.
    pub async fn mount(&self) -> Result<()> {
        self.list.mount().await;
        self.refresh().await
    }

    pub async fn unmount(&self) {
        self.list.unmount().await;
    }

    /// A file was un-published or deleted in this session
    pub async fn forget(&self, id: &str) {
        self.list.evict(id).await;
    }

    pub async fn refresh(&self) -> Result<()> {
        let repo = &self.repo;
        self.list
            .refresh(|_| async move { repo.list_public().await })
            .await
    }

    /// Fetch the bytes, count the download and re-fetch the gallery
    pub async fn download(&self, id: &str) -> Result<Download> {
        let file = self
            .list
            .get(id)
            .await
            .ok_or_else(|| AppError::Authorization(format!("File not found: {}", id)))?;

        let download = match self.repo.download(&file).await {
            Ok(download) => download,
            Err(e) => {
                self.list.report(&e).await;
                return Err(e);
            }
        };

        if let Err(e) = self.refresh().await {
            tracing::debug!("Gallery refresh after download failed: {}", e);
        }
        Ok(download)
    }

    /// Download and save into `dir`
    pub async fn download_to(&self, id: &str, dir: &Path) -> Result<PathBuf> {
        let download = self.download(id).await?;
        save_download(dir, &download).await
    }

    pub async fn public_url(&self, id: &str) -> Option<String> {
        let file = self.list.get(id).await?;
        Some(self.repo.public_url(&file))
    }
}

#[async_trait]
impl SessionAware for GalleryView {
    async fn session_changed(&self, session: &SessionState) {
        if self.list.reset_for(session).await {
            if let Err(e) = self.refresh().await {
                tracing::warn!("Failed to load gallery: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::testing::{MemoryObjects, MemoryTables};
    use crate::views::testing::signed_in;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_remount_refetches() {
        let tables = Arc::new(MemoryTables::default());
        let repo = FilesRepository::new(tables, Arc::new(MemoryObjects::default()));
        let gallery = GalleryView::new(signed_in("u1").await, repo.clone());

        let file = repo.upload("u1", b"pic", "a.png", "image/png").await.unwrap();
        repo.toggle_visibility(&file).await.unwrap();
        gallery.refresh().await.unwrap();
        let listed = gallery.list().get(&file.id).await.unwrap();
        assert!(listed.is_public);

        // Un-published by another client while the gallery was hidden
        gallery.unmount().await;
        repo.toggle_visibility(&listed).await.unwrap();
        gallery.mount().await.unwrap();

        assert!(gallery.list().items().await.is_empty());
    }
}
