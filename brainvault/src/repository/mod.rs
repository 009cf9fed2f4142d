//! Entity repositories
//!
//! One generic repository parametrized by entity, plus entity-specific
//! operations in the submodules. Repositories never check ownership
//! themselves; the table store enforces it and a denied write surfaces
//! as the same `Authorization` error as a missing row.

pub mod cache;
pub mod files;
pub mod folders;
pub mod notes;
pub mod tags;

pub use cache::LocalCache;
pub use files::{sanitize_filename, storage_path_for, Download, FilesRepository};
pub use folders::FoldersRepository;
pub use notes::NotesRepository;
pub use tags::TagsRepository;

use crate::error::{AppError, Result};
use crate::remote::{Query, Row, Table, TableStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// A vault row type stored in one table
pub trait Record: DeserializeOwned + Clone + Send + Sync + 'static {
    const TABLE: Table;

    /// Column the owner's list is sorted on, newest first
    const ORDER_BY: &'static str;

    /// Insert payload
    type New: Serialize + Send + Sync;

    /// Partial update payload
    type Patch: Serialize + Send + Sync;

    fn id(&self) -> &str;

    /// Turn an insert payload into a row, applying defaults and
    /// client-side validation before any request is sent
    fn new_row(fields: &Self::New) -> Result<Row> {
        to_row(fields)
    }
}

/// Rows carrying a public/private visibility flag
pub trait Publishable: Record {
    fn is_public(&self) -> bool;

    fn set_public(&mut self, is_public: bool);

    fn visibility_patch(is_public: bool) -> Self::Patch;
}

/// Serialize a payload into a JSON object row
pub(crate) fn to_row<S: Serialize>(value: &S) -> Result<Row> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::Generic(format!(
            "Expected an object payload, got {}",
            other
        ))),
    }
}

fn decode<T: Record>(row: Row) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(row))?)
}

/// Generic list/create/update/delete over one table
pub struct Repository<T> {
    tables: Arc<dyn TableStore>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            tables: self.tables.clone(),
            _record: PhantomData,
        }
    }
}

impl<T: Record> Repository<T> {
    pub fn new(tables: Arc<dyn TableStore>) -> Self {
        Self {
            tables,
            _record: PhantomData,
        }
    }

    /// Rows owned by `owner_id`, in the entity's display order.
    /// Zero rows is an empty list, not an error.
    pub async fn list(&self, owner_id: &str) -> Result<Vec<T>> {
        self.list_where(Query::new().eq("user_id", owner_id)).await
    }

    /// Rows matching `query`, in the entity's display order
    pub async fn list_where(&self, query: Query) -> Result<Vec<T>> {
        let query = query.order_desc(T::ORDER_BY);
        let rows = self.tables.select(T::TABLE, &query).await?;

        tracing::debug!("Loaded {} {}", rows.len(), T::TABLE);

        rows.into_iter().map(decode).collect()
    }

    /// Insert a row for `owner_id`; the store assigns id and timestamps
    pub async fn create(&self, owner_id: &str, fields: &T::New) -> Result<T> {
        let mut row = T::new_row(fields)?;
        row.insert("user_id".to_string(), Value::String(owner_id.to_string()));

        let created: T = decode(self.tables.insert(T::TABLE, row).await?)?;

        tracing::info!("Created {} row: {}", T::TABLE, created.id());
        Ok(created)
    }

    /// Write only the fields set in `patch`
    pub async fn update(&self, id: &str, patch: &T::Patch) -> Result<()> {
        let fields = to_row(patch)?;
        if fields.is_empty() {
            return Err(AppError::Validation("Nothing to update".to_string()));
        }

        self.tables.update(T::TABLE, id, fields).await?;

        tracing::debug!("Updated {} row: {}", T::TABLE, id);
        Ok(())
    }

    /// Delete a row. Deleting a missing row fails.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.tables.delete(T::TABLE, id).await?;

        tracing::info!("Deleted {} row: {}", T::TABLE, id);
        Ok(())
    }

    pub async fn count(&self, owner_id: &str) -> Result<u64> {
        self.tables
            .count(T::TABLE, &Query::new().eq("user_id", owner_id))
            .await
    }
}

impl<T: Publishable> Repository<T> {
    pub async fn set_visibility(&self, id: &str, is_public: bool) -> Result<()> {
        self.update(id, &T::visibility_patch(is_public)).await
    }

    /// Flip the entity's visibility with a single-field update.
    /// Returns the new value.
    pub async fn toggle_visibility(&self, entity: &T) -> Result<bool> {
        let next = !entity.is_public();
        self.set_visibility(entity.id(), next).await?;

        tracing::info!(
            "{} row {} is now {}",
            T::TABLE,
            entity.id(),
            if next { "public" } else { "private" }
        );
        Ok(next)
    }

    pub async fn count_public(&self, owner_id: &str) -> Result<u64> {
        self.tables
            .count(
                T::TABLE,
                &Query::new().eq("user_id", owner_id).eq("is_public", true),
            )
            .await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory table and object stores for repository and view tests

    use super::*;
    use crate::remote::ObjectStore;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records every call and serves rows from memory without policies
    #[derive(Default)]
    pub struct MemoryTables {
        pub rows: Mutex<Vec<(Table, Row)>>,
        pub updates: Mutex<Vec<(Table, String, Row)>>,
        pub fail_selects: Mutex<bool>,
        fail_updates: Mutex<u32>,
        next_id: Mutex<u64>,
    }

    impl MemoryTables {
        pub fn updates_for(&self, id: &str) -> Vec<Row> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, row_id, _)| row_id == id)
                .map(|(_, _, fields)| fields.clone())
                .collect()
        }

        pub fn set_fail_selects(&self, fail: bool) {
            *self.fail_selects.lock().unwrap() = fail;
        }

        /// The next `n` updates fail as if the connection dropped
        pub fn fail_next_updates(&self, n: u32) {
            *self.fail_updates.lock().unwrap() = n;
        }
    }

    fn matches(row: &Row, query: &Query) -> bool {
        query
            .filters
            .iter()
            .all(|(column, value)| row.get(column).unwrap_or(&Value::Null) == value)
    }

    #[async_trait]
    impl TableStore for MemoryTables {
        async fn select(&self, table: Table, query: &Query) -> Result<Vec<Row>> {
            if *self.fail_selects.lock().unwrap() {
                return Err(AppError::Transport("connection reset".to_string()));
            }
            let mut rows: Vec<Row> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, row)| *t == table && matches(row, query))
                .map(|(_, row)| row.clone())
                .collect();
            if let Some(order) = &query.order {
                rows.sort_by(|a, b| {
                    let a = a.get(&order.column).and_then(Value::as_str).unwrap_or_default();
                    let b = b.get(&order.column).and_then(Value::as_str).unwrap_or_default();
                    if order.descending {
                        b.cmp(a)
                    } else {
                        a.cmp(b)
                    }
                });
            }
            Ok(rows)
        }

        async fn count(&self, table: Table, query: &Query) -> Result<u64> {
            Ok(self.select(table, query).await?.len() as u64)
        }

        async fn insert(&self, table: Table, mut row: Row) -> Result<Row> {
            let n = {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                *next
            };
            let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(n as i64);
            let stamp = Value::String(at.to_rfc3339());

            row.insert("id".to_string(), Value::String(format!("row-{}", n)));
            row.entry("created_at".to_string()).or_insert_with(|| stamp.clone());
            row.entry("updated_at".to_string()).or_insert(stamp);
            row.entry("folder_id".to_string()).or_insert(Value::Null);
            row.entry("parent_id".to_string()).or_insert(Value::Null);
            if table == Table::Files {
                row.entry("download_count".to_string()).or_insert(Value::from(0));
            }

            self.rows.lock().unwrap().push((table, row.clone()));
            Ok(row)
        }

        async fn update(&self, table: Table, id: &str, fields: Row) -> Result<()> {
            {
                let mut failing = self.fail_updates.lock().unwrap();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(AppError::Transport("connection reset".to_string()));
                }
            }
            self.updates
                .lock()
                .unwrap()
                .push((table, id.to_string(), fields.clone()));

            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|(t, row)| *t == table && row.get("id") == Some(&Value::String(id.to_string())))
                .ok_or_else(|| AppError::Authorization(format!("{} row {} not found", table, id)))?;
            for (key, value) in fields {
                row.1.insert(key, value);
            }
            Ok(())
        }

        async fn delete(&self, table: Table, id: &str) -> Result<()> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|(t, row)| !(*t == table && row.get("id") == Some(&Value::String(id.to_string()))));
            if rows.len() == before {
                return Err(AppError::Authorization(format!("{} row {} not found", table, id)));
            }
            Ok(())
        }
    }

    /// Object store backed by a map; `fail_puts` simulates a dropped upload
    #[derive(Default)]
    pub struct MemoryObjects {
        pub objects: Mutex<HashMap<String, Vec<u8>>>,
        pub fail_puts: bool,
    }

    #[async_trait]
    impl ObjectStore for MemoryObjects {
        async fn put(&self, path: &str, bytes: &[u8], _media_type: &str) -> Result<()> {
            if self.fail_puts {
                return Err(AppError::Transport("upload interrupted".to_string()));
            }
            self.objects
                .lock()
                .unwrap()
                .insert(path.to_string(), bytes.to_vec());
            Ok(())
        }

        async fn get(&self, path: &str) -> Result<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| AppError::Authorization(format!("Object not found: {}", path)))
        }

        async fn remove(&self, paths: &[String]) -> Result<()> {
            let mut objects = self.objects.lock().unwrap();
            for path in paths {
                objects.remove(path);
            }
            Ok(())
        }

        fn public_url(&self, path: &str) -> String {
            format!("https://cdn.test/{}", path)
        }
    }
}
