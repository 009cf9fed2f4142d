//! Files repository
//!
//! File rows point at objects in the object store. Uploads store the
//! bytes before the row exists, so a row never references a missing
//! object. A failed insert after a successful put leaves an orphaned
//! object; that is logged with its path and not cleaned up.

use super::{Publishable, Record, Repository};
use crate::config::MAX_FILE_NAME_LENGTH;
use crate::database::{FilePatch, FileRecord, NewFile};
use crate::error::{AppError, Result};
use crate::remote::{ObjectStore, Query, Table, TableStore};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

impl Record for FileRecord {
    const TABLE: Table = Table::Files;
    const ORDER_BY: &'static str = "created_at";

    type New = NewFile;
    type Patch = FilePatch;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Publishable for FileRecord {
    fn is_public(&self) -> bool {
        self.is_public
    }

    fn set_public(&mut self, is_public: bool) {
        self.is_public = is_public;
    }

    fn visibility_patch(is_public: bool) -> FilePatch {
        FilePatch {
            is_public: Some(is_public),
            ..Default::default()
        }
    }
}

/// Bytes fetched for a file plus the row after its counter was bumped
#[derive(Debug, Clone)]
pub struct Download {
    pub file: FileRecord,
    pub bytes: Vec<u8>,
}

/// Strip path separators and NUL bytes and cap the length
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .filter(|c| *c != '/' && *c != '\\' && *c != '\0')
        .take(MAX_FILE_NAME_LENGTH)
        .collect();

    match cleaned.trim() {
        "" | "." | ".." => "file".to_string(),
        _ => cleaned,
    }
}

/// Fresh object path under the owner's prefix:
/// `{owner}/{millis}-{random}_{name}`
pub fn storage_path_for(owner_id: &str, filename: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "{}/{}-{}_{}",
        owner_id,
        Utc::now().timestamp_millis(),
        &suffix[..8],
        sanitize_filename(filename)
    )
}

#[derive(Clone)]
pub struct FilesRepository {
    rows: Repository<FileRecord>,
    objects: Arc<dyn ObjectStore>,
}

impl FilesRepository {
    pub fn new(tables: Arc<dyn TableStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            rows: Repository::new(tables),
            objects,
        }
    }

    /// Owner's files, newest first
    pub async fn list(&self, owner_id: &str) -> Result<Vec<FileRecord>> {
        self.rows.list(owner_id).await
    }

    /// Every public file regardless of owner, newest first
    pub async fn list_public(&self) -> Result<Vec<FileRecord>> {
        self.rows
            .list_where(Query::new().eq("is_public", true))
            .await
    }

    pub async fn list_in_folder(
        &self,
        owner_id: &str,
        folder_id: Option<&str>,
    ) -> Result<Vec<FileRecord>> {
        let folder = folder_id.map_or(Value::Null, |id| Value::String(id.to_string()));
        self.rows
            .list_where(Query::new().eq("user_id", owner_id).eq("folder_id", folder))
            .await
    }

    /// Store `bytes` and then record them as a private file
    pub async fn upload(
        &self,
        owner_id: &str,
        bytes: &[u8],
        name: &str,
        media_type: &str,
    ) -> Result<FileRecord> {
        // The row keeps the name as given; only the object path is sanitized
        let display_name = if name.trim().is_empty() {
            sanitize_filename(name)
        } else {
            name.to_string()
        };
        let storage_path = storage_path_for(owner_id, name);

        tracing::info!(
            "Uploading {} ({} bytes) to {}",
            display_name,
            bytes.len(),
            storage_path
        );

        self.objects.put(&storage_path, bytes, media_type).await?;

        let fields = NewFile {
            name: display_name,
            storage_path: storage_path.clone(),
            file_type: media_type.to_string(),
            file_size: bytes.len() as i64,
            is_public: false,
            folder_id: None,
        };

        match self.rows.create(owner_id, &fields).await {
            Ok(file) => Ok(file),
            Err(e) => {
                tracing::warn!(
                    "Metadata insert failed, object left orphaned at {}: {}",
                    storage_path,
                    e
                );
                Err(e)
            }
        }
    }

    /// Remove the stored object, then the row
    pub async fn delete(&self, file: &FileRecord) -> Result<()> {
        self.objects
            .remove(std::slice::from_ref(&file.storage_path))
            .await?;
        self.rows.delete(&file.id).await
    }

    pub async fn update(&self, id: &str, patch: &FilePatch) -> Result<()> {
        self.rows.update(id, patch).await
    }

    pub async fn rename(&self, id: &str, name: &str) -> Result<()> {
        let name = sanitize_filename(name);
        let patch = FilePatch {
            name: Some(name),
            ..Default::default()
        };
        self.rows.update(id, &patch).await
    }

    pub async fn move_to_folder(&self, id: &str, folder_id: Option<&str>) -> Result<()> {
        let patch = FilePatch {
            folder_id: Some(folder_id.map(str::to_string)),
            ..Default::default()
        };
        self.rows.update(id, &patch).await
    }

    pub async fn toggle_visibility(&self, file: &FileRecord) -> Result<bool> {
        self.rows.toggle_visibility(file).await
    }

    /// Fetch the bytes, then write `download_count + 1`.
    ///
    /// The increment is computed from `file` and is not atomic; two
    /// concurrent downloads may count once. A failed increment does not
    /// fail the download.
    pub async fn download(&self, file: &FileRecord) -> Result<Download> {
        let bytes = self.objects.get(&file.storage_path).await?;

        if bytes.len() as i64 != file.file_size {
            tracing::warn!(
                "Stored object {} is {} bytes, row says {}",
                file.storage_path,
                bytes.len(),
                file.file_size
            );
        }

        let mut file = file.clone();
        let patch = FilePatch {
            download_count: Some(file.download_count + 1),
            ..Default::default()
        };
        match self.rows.update(&file.id, &patch).await {
            Ok(()) => file.download_count += 1,
            Err(e) => tracing::warn!("Failed to record download of {}: {}", file.id, e),
        }

        Ok(Download { file, bytes })
    }

    pub fn public_url(&self, file: &FileRecord) -> String {
        self.objects.public_url(&file.storage_path)
    }

    pub async fn count(&self, owner_id: &str) -> Result<u64> {
        self.rows.count(owner_id).await
    }

    pub async fn count_public(&self, owner_id: &str) -> Result<u64> {
        self.rows.count_public(owner_id).await
    }

    /// Look up one file by id within the caller's visible rows
    pub async fn get(&self, id: &str) -> Result<FileRecord> {
        self.rows
            .list_where(Query::new().eq("id", id))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Authorization(format!("File not found: {}", id)))
    }
}
