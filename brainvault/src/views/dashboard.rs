//! Dashboard view
//!
//! Headline counts for the signed-in user, fetched concurrently.

use super::SessionAware;
use crate::error::{AppError, Result};
use crate::repository::{FilesRepository, FoldersRepository, NotesRepository};
use crate::session::{SessionContext, SessionState};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DashboardCounts {
    pub notes: u64,
    pub files: u64,
    pub folders: u64,
    /// Public notes plus public files
    pub public_items: u64,
}

#[derive(Default)]
struct DashboardState {
    owner: Option<String>,
    counts: Option<DashboardCounts>,
    generation: u64,
}

#[derive(Clone)]
pub struct DashboardView {
    session: SessionContext,
    notes: NotesRepository,
    files: FilesRepository,
    folders: FoldersRepository,
    state: Arc<Mutex<DashboardState>>,
}

impl DashboardView {
    pub fn new(
        session: SessionContext,
        notes: NotesRepository,
        files: FilesRepository,
        folders: FoldersRepository,
    ) -> Self {
        Self {
            session,
            notes,
            files,
            folders,
            state: Arc::new(Mutex::new(DashboardState::default())),
        }
    }

    /// Last loaded counts; `None` while loading or signed out
    pub async fn counts(&self) -> Option<DashboardCounts> {
        self.state.lock().await.counts
    }

    pub async fn refresh(&self) -> Result<DashboardCounts> {
        let owner = self
            .session
            .user_id()
            .ok_or_else(|| AppError::Authorization("Not signed in".to_string()))?;
        let ticket = self.state.lock().await.generation;

        let (notes, files, folders, public_notes, public_files) = tokio::try_join!(
            self.notes.count(&owner),
            self.files.count(&owner),
            self.folders.count(&owner),
            self.notes.count_public(&owner),
            self.files.count_public(&owner),
        )?;

        let counts = DashboardCounts {
            notes,
            files,
            folders,
            public_items: public_notes + public_files,
        };

        let mut state = self.state.lock().await;
        if state.generation == ticket {
            state.owner = Some(owner);
            state.counts = Some(counts);
        } else {
            tracing::debug!("Dashboard: discarding stale counts");
        }

        Ok(counts)
    }
}

#[async_trait]
impl SessionAware for DashboardView {
    async fn session_changed(&self, session: &SessionState) {
        let user = session.user_id().map(str::to_string);
        {
            let mut state = self.state.lock().await;
            if state.owner == user && state.counts.is_some() {
                return;
            }
            state.owner = None;
            state.counts = None;
            state.generation += 1;
        }

        if session.is_loading || user.is_none() {
            return;
        }
        if let Err(e) = self.refresh().await {
            tracing::warn!("Failed to load dashboard: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{NewFolder, NewNote};
    use crate::repository::testing::{MemoryObjects, MemoryTables};
    use crate::views::testing::signed_in;

    #[tokio::test]
    async fn test_counts() {
        let tables = Arc::new(MemoryTables::default());
        let notes = NotesRepository::new(tables.clone());
        let folders = FoldersRepository::new(tables.clone());
        let files = FilesRepository::new(tables.clone(), Arc::new(MemoryObjects::default()));

        let public = notes.create("u1", &NewNote::default()).await.unwrap();
        notes.toggle_visibility(&public).await.unwrap();
        notes.create("u1", &NewNote::default()).await.unwrap();
        notes.create("u2", &NewNote::default()).await.unwrap();
        folders
            .create(
                "u1",
                &NewFolder {
                    name: "F".to_string(),
                    parent_id: None,
                },
            )
            .await
            .unwrap();

        let view = DashboardView::new(signed_in("u1").await, notes, files, folders);
        let counts = view.refresh().await.unwrap();

        assert_eq!(
            counts,
            DashboardCounts {
                notes: 2,
                files: 0,
                folders: 1,
                public_items: 1,
            }
        );
        assert_eq!(view.counts().await, Some(counts));
    }
}
