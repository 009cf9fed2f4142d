//! Notes repository

use super::{to_row, Publishable, Record, Repository};
use crate::config::DEFAULT_NOTE_TITLE;
use crate::database::{NewNote, Note, NotePatch};
use crate::error::Result;
use crate::remote::{Query, Row, Table};
use chrono::Utc;
use serde_json::Value;

impl Record for Note {
    const TABLE: Table = Table::Notes;
    const ORDER_BY: &'static str = "updated_at";

    type New = NewNote;
    type Patch = NotePatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn new_row(fields: &NewNote) -> Result<Row> {
        let mut row = to_row(fields)?;
        if fields.title.trim().is_empty() {
            row.insert(
                "title".to_string(),
                Value::String(DEFAULT_NOTE_TITLE.to_string()),
            );
        }
        Ok(row)
    }
}

impl Publishable for Note {
    fn is_public(&self) -> bool {
        self.is_public
    }

    fn set_public(&mut self, is_public: bool) {
        self.is_public = is_public;
    }

    fn visibility_patch(is_public: bool) -> NotePatch {
        NotePatch {
            is_public: Some(is_public),
            ..Default::default()
        }
    }
}

pub type NotesRepository = Repository<Note>;

impl Repository<Note> {
    /// Persist an editor draft. Bumps `updated_at` so the note moves to
    /// the top of the owner's list.
    pub async fn save_content(&self, id: &str, title: &str, content: &str) -> Result<()> {
        let patch = NotePatch {
            title: Some(title.to_string()),
            content: Some(content.to_string()),
            updated_at: Some(Utc::now()),
            ..Default::default()
        };
        self.update(id, &patch).await
    }

    /// Move a note into `folder_id`, or to the root with `None`
    pub async fn move_to_folder(&self, id: &str, folder_id: Option<&str>) -> Result<()> {
        let patch = NotePatch {
            folder_id: Some(folder_id.map(str::to_string)),
            ..Default::default()
        };
        self.update(id, &patch).await
    }

    /// Owner's notes directly inside `folder_id` (`None` is the root)
    pub async fn list_in_folder(&self, owner_id: &str, folder_id: Option<&str>) -> Result<Vec<Note>> {
        let folder = folder_id.map_or(Value::Null, |id| Value::String(id.to_string()));
        self.list_where(Query::new().eq("user_id", owner_id).eq("folder_id", folder))
            .await
    }
}

/// Case-insensitive match on title or content
pub fn matches_search(note: &Note, term: &str) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return true;
    }
    note.title.to_lowercase().contains(&term) || note.content.to_lowercase().contains(&term)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::repository::testing::MemoryTables;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryTables>, NotesRepository) {
        let tables = Arc::new(MemoryTables::default());
        (tables.clone(), NotesRepository::new(tables))
    }

    #[tokio::test]
    async fn test_create_applies_default_title() {
        let (_tables, repo) = setup();

        let note = repo.create("u1", &NewNote::default()).await.unwrap();

        assert_eq!(note.title, DEFAULT_NOTE_TITLE);
        assert_eq!(note.content, "");
        assert!(!note.is_public);
        assert_eq!(note.user_id, "u1");
    }

    #[tokio::test]
    async fn test_create_keeps_given_title() {
        let (_tables, repo) = setup();
        let fields = NewNote {
            title: "Groceries".to_string(),
            content: "eggs".to_string(),
            ..Default::default()
        };

        let note = repo.create("u1", &fields).await.unwrap();

        assert_eq!(note.title, "Groceries");
        assert_eq!(note.content, "eggs");
    }

    #[tokio::test]
    async fn test_list_is_scoped_and_newest_first() {
        let (_tables, repo) = setup();
        let first = repo.create("u1", &NewNote::default()).await.unwrap();
        repo.create("u2", &NewNote::default()).await.unwrap();
        let second = repo.create("u1", &NewNote::default()).await.unwrap();

        let listed = repo.list("u1").await.unwrap();

        let ids: Vec<_> = listed.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec![second.id.as_str(), first.id.as_str()]);
    }

    #[tokio::test]
    async fn test_toggle_sends_single_field() {
        let (tables, repo) = setup();
        let note = repo.create("u1", &NewNote::default()).await.unwrap();

        let now_public = repo.toggle_visibility(&note).await.unwrap();

        assert!(now_public);
        let updates = tables.updates_for(&note.id);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].len(), 1);
        assert_eq!(updates[0]["is_public"], json!(true));
    }

    #[tokio::test]
    async fn test_save_content_bumps_updated_at() {
        let (tables, repo) = setup();
        let note = repo.create("u1", &NewNote::default()).await.unwrap();

        repo.save_content(&note.id, "T", "body").await.unwrap();

        let fields = &tables.updates_for(&note.id)[0];
        assert_eq!(fields["title"], json!("T"));
        assert_eq!(fields["content"], json!("body"));
        assert!(fields.contains_key("updated_at"));
        assert!(!fields.contains_key("is_public"));
    }

    #[tokio::test]
    async fn test_empty_patch_is_rejected() {
        let (_tables, repo) = setup();

        let result = repo.update("row-1", &NotePatch::default()).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_move_to_root_sends_null() {
        let (tables, repo) = setup();
        let note = repo.create("u1", &NewNote::default()).await.unwrap();

        repo.move_to_folder(&note.id, None).await.unwrap();

        assert_eq!(tables.updates_for(&note.id)[0]["folder_id"], Value::Null);
        let root = repo.list_in_folder("u1", None).await.unwrap();
        assert_eq!(root.len(), 1);
    }

    #[test]
    fn test_search_matching() {
        let note = Note {
            id: "n".to_string(),
            user_id: "u".to_string(),
            folder_id: None,
            title: "Weekly Plan".to_string(),
            content: "Call the plumber".to_string(),
            is_public: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(matches_search(&note, "weekly"));
        assert!(matches_search(&note, "PLUMBER"));
        assert!(matches_search(&note, "  "));
        assert!(!matches_search(&note, "dentist"));
    }
}
