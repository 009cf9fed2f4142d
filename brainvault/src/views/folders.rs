//! Folders view

use super::{FilesView, ListController, NotesView, SessionAware};
use crate::database::{Folder, NewFolder};
use crate::error::Result;
use crate::repository::folders::validate_folder_name;
use crate::repository::FoldersRepository;
use crate::session::{SessionContext, SessionState};
use async_trait::async_trait;

#[derive(Clone)]
pub struct FoldersView {
    list: ListController<Folder>,
    repo: FoldersRepository,
    notes: Option<NotesView>,
    files: Option<FilesView>,
}

impl FoldersView {
    pub fn new(session: SessionContext, repo: FoldersRepository) -> Self {
        Self {
            list: ListController::owned("Folders", session),
            repo,
            notes: None,
            files: None,
        }
    }

    /// Views whose cached rows follow folder deletes
    pub fn with_contents(mut self, notes: NotesView, files: FilesView) -> Self {
        self.notes = Some(notes);
        self.files = Some(files);
        self
    }

    pub fn list(&self) -> &ListController<Folder> {
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

    /// Create a folder. Blank names fail before any request.
    pub async fn create(&self, name: &str, parent_id: Option<&str>) -> Result<Folder> {
        let owner = self.list.require_user()?;
        let fields = NewFolder {
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
        };
        self.list
            .mutate(self.repo.create(&owner, &fields), |cache, folder| {
                cache.insert_front(folder.clone())
            })
            .await
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<()> {
        let trimmed = validate_folder_name(name)?;
        self.list
            .mutate(self.repo.rename(id, &trimmed), |cache, _| {
                cache.patch(id, |f| f.name = trimmed.clone());
            })
            .await
    }

    /// Delete after the user confirmed. Contents stay, unfiled, also in
    /// the linked notes and files views.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.list
            .mutate(self.repo.delete(id), |cache, _| {
                cache.remove(id);
                let orphans: Vec<String> = cache
                    .items()
                    .iter()
                    .filter(|f| f.parent_id.as_deref() == Some(id))
                    .map(|f| f.id.clone())
                    .collect();
                for child in orphans {
                    cache.patch(&child, |f| f.parent_id = None);
                }
            })
            .await?;

        if let Some(notes) = &self.notes {
            notes.unfile(id).await;
        }
        if let Some(files) = &self.files {
            files.unfile(id).await;
        }
        Ok(())
    }
}

#[async_trait]
impl SessionAware for FoldersView {
    async fn session_changed(&self, session: &SessionState) {
        if self.list.reset_for(session).await {
            if let Err(e) = self.refresh().await {
                tracing::warn!("Failed to load folders: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, ErrorKind};
    use crate::database::NewNote;
    use crate::repository::testing::{MemoryObjects, MemoryTables};
    use crate::repository::{FilesRepository, NotesRepository};
    use crate::views::testing::signed_in;
    use std::sync::Arc;
    use std::time::Duration;

    async fn setup() -> (Arc<MemoryTables>, FoldersView) {
        let tables = Arc::new(MemoryTables::default());
        let view = FoldersView::new(signed_in("u1").await, FoldersRepository::new(tables.clone()));
        (tables, view)
    }

    #[tokio::test]
    async fn test_blank_name_posts_validation_notice() {
        let (tables, view) = setup().await;

        let result = view.create("  ", None).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(tables.rows.lock().unwrap().is_empty());
        assert_eq!(view.list().notices().await[0].kind, ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_delete_unfiles_children_locally() {
        let (_tables, view) = setup().await;
        let parent = view.create("Parent", None).await.unwrap();
        let child = view.create("Child", Some(&parent.id)).await.unwrap();

        view.delete(&parent.id).await.unwrap();

        let items = view.list().items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, child.id);
        assert!(items[0].parent_id.is_none());
    }

    #[tokio::test]
    async fn test_rename_patches_cache() {
        let (_tables, view) = setup().await;
        let folder = view.create("Old", None).await.unwrap();

        view.rename(&folder.id, " New ").await.unwrap();

        assert_eq!(view.list().get(&folder.id).await.unwrap().name, "New");
    }

    #[tokio::test]
    async fn test_delete_unfiles_cached_notes_and_files() {
        let tables = Arc::new(MemoryTables::default());
        let session = signed_in("u1").await;
        let notes = NotesView::new(
            session.clone(),
            NotesRepository::new(tables.clone()),
            Duration::from_millis(800),
        );
        let files = FilesView::new(
            session.clone(),
            FilesRepository::new(tables.clone(), Arc::new(MemoryObjects::default())),
        );
        let view = FoldersView::new(session, FoldersRepository::new(tables))
            .with_contents(notes.clone(), files.clone());

        let folder = view.create("Projects", None).await.unwrap();
        let note = notes.create(NewNote::default()).await.unwrap();
        notes.move_to_folder(&note.id, Some(&folder.id)).await.unwrap();
        let file = files.upload(b"doc", "a.txt", "text/plain").await.unwrap();
        files.move_to_folder(&file.id, Some(&folder.id)).await.unwrap();

        view.delete(&folder.id).await.unwrap();

        assert!(notes.list().get(&note.id).await.unwrap().folder_id.is_none());
        assert!(files.list().get(&file.id).await.unwrap().folder_id.is_none());
    }
}
