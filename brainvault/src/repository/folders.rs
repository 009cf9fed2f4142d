//! Folders repository
//!
//! Deleting a folder leaves its notes, files and child folders in
//! place; the store clears their reference.

use super::{Record, Repository};
use crate::database::{Folder, FolderPatch, NewFolder};
use crate::error::{AppError, Result};
use crate::remote::{Query, Row, Table};
use serde_json::Value;

/// Trimmed folder name, rejected before any request when empty
pub fn validate_folder_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(
            "Folder name cannot be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

impl Record for Folder {
    const TABLE: Table = Table::Folders;
    const ORDER_BY: &'static str = "created_at";

    type New = NewFolder;
    type Patch = FolderPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn new_row(fields: &NewFolder) -> Result<Row> {
        let fields = NewFolder {
            name: validate_folder_name(&fields.name)?,
            parent_id: fields.parent_id.clone(),
        };
        super::to_row(&fields)
    }
}

pub type FoldersRepository = Repository<Folder>;

impl Repository<Folder> {
    pub async fn rename(&self, id: &str, name: &str) -> Result<()> {
        let patch = FolderPatch {
            name: Some(validate_folder_name(name)?),
            ..Default::default()
        };
        self.update(id, &patch).await
    }

    /// Nest a folder under `parent_id`, or move it to the root with `None`
    pub async fn move_under(&self, id: &str, parent_id: Option<&str>) -> Result<()> {
        if parent_id == Some(id) {
            return Err(AppError::Validation(
                "A folder cannot contain itself".to_string(),
            ));
        }
        let patch = FolderPatch {
            parent_id: Some(parent_id.map(str::to_string)),
            ..Default::default()
        };
        self.update(id, &patch).await
    }

    /// Owner's folders directly under `parent_id` (`None` is the root)
    pub async fn list_children(&self, owner_id: &str, parent_id: Option<&str>) -> Result<Vec<Folder>> {
        let parent = parent_id.map_or(Value::Null, |id| Value::String(id.to_string()));
        self.list_where(Query::new().eq("user_id", owner_id).eq("parent_id", parent))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::testing::MemoryTables;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryTables>, FoldersRepository) {
        let tables = Arc::new(MemoryTables::default());
        (tables.clone(), FoldersRepository::new(tables))
    }

    fn named(name: &str) -> NewFolder {
        NewFolder {
            name: name.to_string(),
            parent_id: None,
        }
    }

    #[tokio::test]
    async fn test_empty_name_rejected_before_request() {
        let (tables, repo) = setup();

        let result = repo.create("u1", &named("   ")).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(tables.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_trims_name() {
        let (_tables, repo) = setup();

        let folder = repo.create("u1", &named("  Work  ")).await.unwrap();

        assert_eq!(folder.name, "Work");
        assert!(folder.parent_id.is_none());
    }

    #[tokio::test]
    async fn test_nested_folders() {
        let (_tables, repo) = setup();
        let parent = repo.create("u1", &named("Projects")).await.unwrap();
        let child = repo
            .create(
                "u1",
                &NewFolder {
                    name: "Rust".to_string(),
                    parent_id: Some(parent.id.clone()),
                },
            )
            .await
            .unwrap();

        let roots = repo.list_children("u1", None).await.unwrap();
        let nested = repo.list_children("u1", Some(&parent.id)).await.unwrap();

        assert_eq!(roots.len(), 1);
        assert_eq!(nested[0].id, child.id);
        assert!(matches!(
            repo.move_under(&parent.id, Some(&parent.id)).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_rename_rejects_blank() {
        let (tables, repo) = setup();
        let folder = repo.create("u1", &named("A")).await.unwrap();

        assert!(repo.rename(&folder.id, "").await.is_err());
        assert!(tables.updates_for(&folder.id).is_empty());

        repo.rename(&folder.id, " B ").await.unwrap();
        assert_eq!(repo.list("u1").await.unwrap()[0].name, "B");
    }
}
