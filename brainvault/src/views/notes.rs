//! Notes view

use super::{ListController, SessionAware};
use crate::database::{NewNote, Note};
use crate::error::{AppError, Result};
use crate::repository::notes::matches_search;
use crate::repository::{NotesRepository, Publishable};
use crate::services::{AutosaveHandle, NavigationPolicy};
use crate::session::{SessionContext, SessionState};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct NotesView {
    list: ListController<Note>,
    repo: NotesRepository,
    autosave_delay: Duration,
    selected: Arc<Mutex<Option<String>>>,
}

impl NotesView {
    pub fn new(session: SessionContext, repo: NotesRepository, autosave_delay: Duration) -> Self {
        Self {
            list: ListController::owned("Notes", session),
            repo,
            autosave_delay,
            selected: Arc::new(Mutex::new(None)),
        }
    }

    pub fn list(&self) -> &ListController<Note> {
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

    /// Create a note, put it at the top of the list and select it
    pub async fn create(&self, fields: NewNote) -> Result<Note> {
        let owner = self.list.require_user()?;
        let note = self
            .list
            .mutate(self.repo.create(&owner, &fields), |cache, note| {
                cache.insert_front(note.clone())
            })
            .await?;

        *self.selected.lock().await = Some(note.id.clone());
        Ok(note)
    }

    /// Delete after the user confirmed. The note leaves the list even if
    /// no refresh follows.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.list
            .mutate(self.repo.delete(id), |cache, _| {
                cache.remove(id);
            })
            .await?;

        let mut selected = self.selected.lock().await;
        if selected.as_deref() == Some(id) {
            *selected = None;
        }
        Ok(())
    }

    /// Flip visibility, patch the local copy, then re-sync with the store
    pub async fn toggle_visibility(&self, id: &str) -> Result<bool> {
        let note = self.cached(id).await?;
        let now_public = self
            .list
            .mutate(self.repo.toggle_visibility(&note), |cache, is_public| {
                cache.patch(id, |n| n.set_public(*is_public));
            })
            .await?;

        if let Err(e) = self.refresh().await {
            tracing::debug!("Re-sync after toggle failed: {}", e);
        }
        Ok(now_public)
    }

    pub async fn move_to_folder(&self, id: &str, folder_id: Option<&str>) -> Result<()> {
        let folder = folder_id.map(str::to_string);
        self.list
            .mutate(self.repo.move_to_folder(id, folder_id), |cache, _| {
                cache.patch(id, |n| n.folder_id = folder);
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

    /// Cached notes whose title or content contains `term`
    pub async fn search(&self, term: &str) -> Vec<Note> {
        self.list
            .items()
            .await
            .into_iter()
            .filter(|note| matches_search(note, term))
            .collect()
    }

    pub async fn selected(&self) -> Option<Note> {
        let id = self.selected.lock().await.clone()?;
        self.list.get(&id).await
    }

    pub async fn select(&self, id: Option<&str>) {
        *self.selected.lock().await = id.map(str::to_string);
    }

    /// Start autosaving edits to a cached note
    pub async fn open_editor(&self, id: &str) -> Result<AutosaveHandle> {
        let note = self.cached(id).await?;
        self.select(Some(id)).await;
        Ok(AutosaveHandle::spawn(
            self.repo.clone(),
            &note,
            self.autosave_delay,
        ))
    }

    /// Leave the editor and pick up the saved note's new position
    pub async fn close_editor(&self, editor: AutosaveHandle, policy: NavigationPolicy) -> Result<()> {
        let closed = editor.close(policy).await;
        if let Err(e) = &closed {
            self.list.report(e).await;
        }
        self.refresh().await?;
        closed
    }

    async fn cached(&self, id: &str) -> Result<Note> {
        self.list
            .get(id)
            .await
            .ok_or_else(|| AppError::Authorization(format!("Note not found: {}", id)))
    }
}

#[async_trait]
impl SessionAware for NotesView {
    async fn session_changed(&self, session: &SessionState) {
        if self.list.reset_for(session).await {
            *self.selected.lock().await = None;
            if let Err(e) = self.refresh().await {
                tracing::warn!("Failed to load notes: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::testing::MemoryTables;
    use crate::views::testing::signed_in;
    use crate::views::Phase;

    async fn setup() -> (Arc<MemoryTables>, NotesView) {
        let tables = Arc::new(MemoryTables::default());
        let session = signed_in("u1").await;
        let view = NotesView::new(
            session,
            NotesRepository::new(tables.clone()),
            Duration::from_millis(800),
        );
        (tables, view)
    }

    #[tokio::test]
    async fn test_create_prepends_and_selects() {
        let (_tables, view) = setup().await;
        view.refresh().await.unwrap();
        assert_eq!(view.list().phase().await, Phase::Empty);

        let first = view.create(NewNote::default()).await.unwrap();
        let second = view.create(NewNote::default()).await.unwrap();

        let items = view.list().items().await;
        assert_eq!(items[0].id, second.id);
        assert_eq!(items[1].id, first.id);
        assert_eq!(view.selected().await.map(|n| n.id), Some(second.id));
        assert_eq!(view.list().phase().await, Phase::Loaded);
    }

    #[tokio::test]
    async fn test_delete_removes_locally() {
        let (_tables, view) = setup().await;
        let note = view.create(NewNote::default()).await.unwrap();

        view.delete(&note.id).await.unwrap();

        assert!(view.list().items().await.is_empty());
        assert!(view.selected().await.is_none());
        assert!(view.delete(&note.id).await.is_err());
        assert_eq!(view.list().notices().await.len(), 1);
    }

    #[tokio::test]
    async fn test_toggle_twice_restores_visibility() {
        let (_tables, view) = setup().await;
        view.refresh().await.unwrap();
        let note = view.create(NewNote::default()).await.unwrap();

        assert!(view.toggle_visibility(&note.id).await.unwrap());
        assert!(view.list().get(&note.id).await.unwrap().is_public);
        assert!(!view.toggle_visibility(&note.id).await.unwrap());
        assert!(!view.list().get(&note.id).await.unwrap().is_public);
    }

    #[tokio::test]
    async fn test_search_filters_cached_notes() {
        let (_tables, view) = setup().await;
        view.create(NewNote {
            title: "Recipes".to_string(),
            content: "pasta".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
        view.create(NewNote {
            title: "Work".to_string(),
            content: "standup".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

        let hits = view.search("PASTA").await;

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Recipes");
        assert_eq!(view.search("").await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_editor_save_moves_note_to_top() {
        let (_tables, view) = setup().await;
        let older = view.create(NewNote::default()).await.unwrap();
        view.create(NewNote::default()).await.unwrap();

        let mut editor = view.open_editor(&older.id).await.unwrap();
        editor.edit("Edited", "text").unwrap();
        view.close_editor(editor, NavigationPolicy::FlushPending)
            .await
            .unwrap();

        let items = view.list().items().await;
        assert_eq!(items[0].id, older.id);
        assert_eq!(items[0].title, "Edited");
    }

    #[tokio::test]
    async fn test_create_requires_user() {
        let tables = Arc::new(MemoryTables::default());
        let session = signed_in("u1").await;
        session.sign_out().await.unwrap();
        let view = NotesView::new(session, NotesRepository::new(tables), Duration::from_millis(800));

        let result = view.create(NewNote::default()).await;

        assert!(matches!(result, Err(AppError::Authorization(_))));
        assert_eq!(view.list().phase().await, Phase::Unauthenticated);
    }
}
