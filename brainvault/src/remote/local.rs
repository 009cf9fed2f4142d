//! Local backend
//!
//! Implements identity, tables and object storage on a SQLite database
//! and a filesystem blob store. The row-level policies of the hosted
//! service are emulated here:
//! - rows are readable by their owner, notes and files also when public
//! - inserts must belong to the caller
//! - updates and deletes only touch the caller's rows; a denied write and
//!   a missing row report the same error
//! - anyone may bump `download_count` on a public file
//! - `updated_at` is refreshed on every update
//!
//! Each `LocalBackend` value carries its own session, so two handles from
//! `connect_client` behave like two independent browsers.

use super::{AuthUser, IdentityService, ObjectStore, Query, Row, Table, TableStore};
use crate::database::create_pool;
use crate::error::{AppError, Result};
use crate::storage::BlobStore;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteRow};
use sqlx::{Row as _, SqlitePool};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

const DB_FILE: &str = "vault.db";
const OBJECTS_DIR: &str = "objects";
const MIN_PASSWORD_LENGTH: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Text,
    OptionalText,
    Bool,
    Integer,
    Timestamp,
}

struct TableSchema {
    table: Table,
    columns: &'static [(&'static str, ColumnKind)],
    /// Columns fixed at insert time
    immutable: &'static [&'static str],
    has_visibility: bool,
    has_updated_at: bool,
}

impl TableSchema {
    fn kind(&self, column: &str) -> Result<ColumnKind> {
        self.columns
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| bad_request(format!("column {}.{} does not exist", self.table, column)))
    }
}

static NOTES: TableSchema = TableSchema {
    table: Table::Notes,
    columns: &[
        ("id", ColumnKind::Text),
        ("user_id", ColumnKind::Text),
        ("folder_id", ColumnKind::OptionalText),
        ("title", ColumnKind::Text),
        ("content", ColumnKind::Text),
        ("is_public", ColumnKind::Bool),
        ("created_at", ColumnKind::Timestamp),
        ("updated_at", ColumnKind::Timestamp),
    ],
    immutable: &["id", "user_id", "created_at"],
    has_visibility: true,
    has_updated_at: true,
};

static FILES: TableSchema = TableSchema {
    table: Table::Files,
    columns: &[
        ("id", ColumnKind::Text),
        ("user_id", ColumnKind::Text),
        ("folder_id", ColumnKind::OptionalText),
        ("name", ColumnKind::Text),
        ("storage_path", ColumnKind::Text),
        ("file_type", ColumnKind::Text),
        ("file_size", ColumnKind::Integer),
        ("is_public", ColumnKind::Bool),
        ("download_count", ColumnKind::Integer),
        ("created_at", ColumnKind::Timestamp),
        ("updated_at", ColumnKind::Timestamp),
    ],
    immutable: &["id", "user_id", "created_at", "storage_path"],
    has_visibility: true,
    has_updated_at: true,
};

static FOLDERS: TableSchema = TableSchema {
    table: Table::Folders,
    columns: &[
        ("id", ColumnKind::Text),
        ("user_id", ColumnKind::Text),
        ("name", ColumnKind::Text),
        ("parent_id", ColumnKind::OptionalText),
        ("created_at", ColumnKind::Timestamp),
        ("updated_at", ColumnKind::Timestamp),
    ],
    immutable: &["id", "user_id", "created_at"],
    has_visibility: false,
    has_updated_at: true,
};

static TAGS: TableSchema = TableSchema {
    table: Table::Tags,
    columns: &[
        ("id", ColumnKind::Text),
        ("user_id", ColumnKind::Text),
        ("name", ColumnKind::Text),
        ("color", ColumnKind::Text),
        ("created_at", ColumnKind::Timestamp),
    ],
    immutable: &["id", "user_id", "created_at"],
    has_visibility: false,
    has_updated_at: false,
};

fn schema_for(table: Table) -> &'static TableSchema {
    match table {
        Table::Notes => &NOTES,
        Table::Files => &FILES,
        Table::Folders => &FOLDERS,
        Table::Tags => &TAGS,
    }
}

/// A bound SQL parameter
#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Text(String),
    Null,
    Bool(bool),
    Integer(i64),
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_value<'q>(query: SqliteQuery<'q>, value: SqlValue) -> SqliteQuery<'q> {
    match value {
        SqlValue::Text(s) => query.bind(s),
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(b) => query.bind(b),
        SqlValue::Integer(i) => query.bind(i),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::Remote {
        status: 400,
        message: message.into(),
    }
}

/// Fixed-width UTC timestamp so text ordering equals time ordering
fn timestamp_text(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn to_sql(column: &str, kind: ColumnKind, value: &Value) -> Result<SqlValue> {
    let mismatch = || bad_request(format!("invalid value for column {}: {}", column, value));

    match (kind, value) {
        (ColumnKind::OptionalText, Value::Null) => Ok(SqlValue::Null),
        (ColumnKind::Text | ColumnKind::OptionalText, Value::String(s)) => {
            Ok(SqlValue::Text(s.clone()))
        }
        (ColumnKind::Bool, Value::Bool(b)) => Ok(SqlValue::Bool(*b)),
        (ColumnKind::Integer, Value::Number(n)) => n.as_i64().map(SqlValue::Integer).ok_or_else(mismatch),
        (ColumnKind::Timestamp, Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|at| SqlValue::Text(timestamp_text(at.with_timezone(&Utc))))
            .map_err(|_| mismatch()),
        _ => Err(mismatch()),
    }
}

fn row_to_json(schema: &TableSchema, row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    for (name, kind) in schema.columns {
        let value = match kind {
            ColumnKind::Text | ColumnKind::Timestamp => Value::String(row.try_get::<String, _>(*name)?),
            ColumnKind::OptionalText => row
                .try_get::<Option<String>, _>(*name)?
                .map(Value::String)
                .unwrap_or(Value::Null),
            ColumnKind::Bool => Value::Bool(row.try_get::<bool, _>(*name)?),
            ColumnKind::Integer => Value::from(row.try_get::<i64, _>(*name)?),
        };
        out.insert(name.to_string(), value);
    }
    Ok(out)
}

/// Translate constraint failures into the remote taxonomy
fn map_write_error(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return AppError::Conflict(db_err.message().to_string());
        }
        if db_err.is_check_violation() || db_err.is_foreign_key_violation() {
            return bad_request(db_err.message().to_string());
        }
    }
    AppError::Database(err)
}

/// Build the WHERE clause for a read, including the visibility policy
fn read_clause(
    schema: &TableSchema,
    query: &Query,
    caller: Option<&AuthUser>,
) -> Result<(String, Vec<SqlValue>)> {
    let mut clause = String::from(" WHERE 1 = 1");
    let mut args = Vec::new();

    for (column, value) in &query.filters {
        let kind = schema.kind(column)?;
        if value.is_null() {
            clause.push_str(&format!(" AND {} IS NULL", column));
        } else {
            clause.push_str(&format!(" AND {} = ?", column));
            args.push(to_sql(column, kind, value)?);
        }
    }

    match (caller, schema.has_visibility) {
        (Some(user), true) => {
            clause.push_str(" AND (user_id = ? OR is_public = 1)");
            args.push(SqlValue::Text(user.id.clone()));
        }
        (Some(user), false) => {
            clause.push_str(" AND user_id = ?");
            args.push(SqlValue::Text(user.id.clone()));
        }
        (None, true) => clause.push_str(" AND is_public = 1"),
        (None, false) => clause.push_str(" AND 0 = 1"),
    }

    Ok((clause, args))
}

fn argon2() -> Result<Argon2<'static>> {
    // Light parameters: local identities guard a single-machine vault
    let params = Params::new(4096, 2, 1, None)
        .map_err(|e| AppError::Generic(format!("Invalid hash parameters: {}", e)))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| AppError::Generic(format!("Salt encoding failed: {}", e)))?;

    argon2()?
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Generic(format!("Password hashing failed: {}", e)))
}

fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| AppError::Generic(format!("Corrupt password hash: {}", e)))?;
    Ok(argon2()?
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// SQLite + filesystem implementation of the remote services
#[derive(Clone)]
pub struct LocalBackend {
    pool: SqlitePool,
    blobs: BlobStore,
    session: Arc<RwLock<Option<AuthUser>>>,
}

impl LocalBackend {
    /// Open (or create) a vault under `data_dir`
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tracing::info!("Opening local vault at: {:?}", data_dir);

        std::fs::create_dir_all(data_dir)?;
        let pool = create_pool(&data_dir.join(DB_FILE)).await?;

        let blobs = BlobStore::new(data_dir.join(OBJECTS_DIR));
        blobs.initialize().await?;

        Ok(Self::from_parts(pool, blobs))
    }

    /// Assemble a backend from an initialized pool and blob store
    pub fn from_parts(pool: SqlitePool, blobs: BlobStore) -> Self {
        Self {
            pool,
            blobs,
            session: Arc::new(RwLock::new(None)),
        }
    }

    /// Another client of the same vault with its own (signed-out) session
    pub fn connect_client(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            blobs: self.blobs.clone(),
            session: Arc::new(RwLock::new(None)),
        }
    }

    pub fn objects_root(&self) -> &Path {
        self.blobs.root()
    }

    /// Stored objects that no file row references.
    ///
    /// These are left behind when an upload stores its bytes but the
    /// metadata insert fails. Reads bypass the row policy.
    pub async fn orphaned_objects(&self) -> Result<Vec<String>> {
        let referenced: HashSet<String> = sqlx::query_scalar("SELECT storage_path FROM files")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .collect();

        let orphans: Vec<String> = self
            .blobs
            .list_all()
            .await?
            .into_iter()
            .filter(|key| !referenced.contains(key))
            .collect();

        if !orphans.is_empty() {
            tracing::warn!("Found {} orphaned object(s)", orphans.len());
        }

        Ok(orphans)
    }

    async fn caller(&self) -> Option<AuthUser> {
        self.session.read().await.clone()
    }

    async fn require_caller(&self) -> Result<AuthUser> {
        self.caller()
            .await
            .ok_or_else(|| AppError::Authorization("Sign in required".to_string()))
    }

    async fn set_session(&self, user: Option<AuthUser>) {
        *self.session.write().await = user;
    }

    /// Objects live under a folder named after their owner
    fn owner_of(path: &str) -> Option<&str> {
        path.split('/').next().filter(|segment| !segment.is_empty())
    }

    async fn object_is_public(&self, path: &str) -> Result<bool> {
        let public: Option<bool> =
            sqlx::query_scalar("SELECT is_public FROM files WHERE storage_path = ?")
                .bind(path)
                .fetch_optional(&self.pool)
                .await?;
        Ok(public.unwrap_or(false))
    }
}

#[async_trait]
impl IdentityService for LocalBackend {
    async fn current_session(&self) -> Result<Option<AuthUser>> {
        Ok(self.caller().await)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        let email = email.trim().to_lowercase();

        let row = sqlx::query("SELECT id, email, password_hash FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?;

        let invalid = || AppError::Authorization("Invalid login credentials".to_string());
        let row = row.ok_or_else(invalid)?;

        let stored: String = row.try_get("password_hash")?;
        let password = password.to_string();
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
            .await
            .map_err(|e| AppError::Generic(format!("Password check aborted: {}", e)))??;

        if !matches {
            return Err(invalid());
        }

        let user = AuthUser {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
        };
        self.set_session(Some(user.clone())).await;

        tracing::info!("Signed in local user: {}", user.id);
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser> {
        let email = email.trim().to_lowercase();

        if !email.contains('@') {
            return Err(AppError::Remote {
                status: 422,
                message: "Unable to validate email address: invalid format".to_string(),
            });
        }
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Remote {
                status: 422,
                message: format!("Password should be at least {} characters", MIN_PASSWORD_LENGTH),
            });
        }

        let owned = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&owned))
            .await
            .map_err(|e| AppError::Generic(format!("Password hashing aborted: {}", e)))??;

        let id = Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(&email)
            .bind(&password_hash)
            .bind(timestamp_text(Utc::now()))
            .execute(&self.pool)
            .await
            .map_err(|e| match map_write_error(e) {
                AppError::Conflict(_) => AppError::Conflict("User already registered".to_string()),
                other => other,
            })?;

        let user = AuthUser { id, email };
        self.set_session(Some(user.clone())).await;

        tracing::info!("Registered local user: {}", user.id);
        Ok(user)
    }

    async fn sign_out(&self) -> Result<()> {
        self.set_session(None).await;
        Ok(())
    }
}

#[async_trait]
impl TableStore for LocalBackend {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Row>> {
        let schema = schema_for(table);
        let caller = self.caller().await;
        let (clause, args) = read_clause(schema, query, caller.as_ref())?;

        let mut sql = format!("SELECT * FROM {}{}", table.name(), clause);
        if let Some(order) = &query.order {
            schema.kind(&order.column)?;
            let direction = if order.descending { "DESC" } else { "ASC" };
            sql.push_str(&format!(
                " ORDER BY {} {}, rowid {}",
                order.column, direction, direction
            ));
        }

        let mut q = sqlx::query(&sql);
        for arg in args {
            q = bind_value(q, arg);
        }

        let rows = q.fetch_all(&self.pool).await?;
        tracing::debug!("Selected {} row(s) from {}", rows.len(), table);

        rows.iter().map(|row| row_to_json(schema, row)).collect()
    }

    async fn count(&self, table: Table, query: &Query) -> Result<u64> {
        let schema = schema_for(table);
        let caller = self.caller().await;
        let (clause, args) = read_clause(schema, query, caller.as_ref())?;

        let sql = format!("SELECT COUNT(*) FROM {}{}", table.name(), clause);
        let mut q = sqlx::query(&sql);
        for arg in args {
            q = bind_value(q, arg);
        }

        let count: i64 = q.fetch_one(&self.pool).await?.get(0);
        Ok(count.max(0) as u64)
    }

    async fn insert(&self, table: Table, mut row: Row) -> Result<Row> {
        let schema = schema_for(table);
        let user = self.require_caller().await?;

        match row.get("user_id") {
            None => {
                row.insert("user_id".to_string(), Value::String(user.id.clone()));
            }
            Some(Value::String(owner)) if *owner == user.id => {}
            Some(_) => {
                return Err(AppError::Authorization(format!(
                    "new row violates row-level security policy for table \"{}\"",
                    table
                )))
            }
        }

        let now = Value::String(timestamp_text(Utc::now()));
        row.entry("id".to_string())
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        row.entry("created_at".to_string()).or_insert_with(|| now.clone());
        if schema.has_updated_at {
            row.entry("updated_at".to_string()).or_insert(now);
        }

        let mut columns = Vec::with_capacity(row.len());
        let mut args = Vec::with_capacity(row.len());
        for (column, value) in &row {
            let kind = schema.kind(column)?;
            columns.push(column.as_str());
            args.push(to_sql(column, kind, value)?);
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
            table.name(),
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        );

        let mut q = sqlx::query(&sql);
        for arg in args {
            q = bind_value(q, arg);
        }

        let inserted = q.fetch_one(&self.pool).await.map_err(map_write_error)?;
        let inserted = row_to_json(schema, &inserted)?;

        tracing::debug!(
            "Inserted into {}: {}",
            table,
            inserted.get("id").and_then(serde_json::Value::as_str).unwrap_or_default()
        );
        Ok(inserted)
    }

    async fn update(&self, table: Table, id: &str, mut fields: Row) -> Result<()> {
        let schema = schema_for(table);
        let user = self.require_caller().await?;

        if fields.is_empty() {
            return Err(bad_request("update requires at least one column"));
        }
        if let Some(column) = fields.keys().find(|c| schema.immutable.contains(&c.as_str())) {
            return Err(AppError::Authorization(format!(
                "column {}.{} cannot be changed",
                table, column
            )));
        }

        let counter_only = table == Table::Files
            && fields.len() == 1
            && fields.contains_key("download_count");
        let new_count = fields.get("download_count").and_then(Value::as_i64);

        if schema.has_updated_at {
            fields
                .entry("updated_at".to_string())
                .or_insert_with(|| Value::String(timestamp_text(Utc::now())));
        }

        let mut assignments = Vec::with_capacity(fields.len());
        let mut args = Vec::with_capacity(fields.len() + 2);
        for (column, value) in &fields {
            let kind = schema.kind(column)?;
            assignments.push(format!("{} = ?", column));
            args.push(to_sql(column, kind, value)?);
        }

        // The counter never goes down. Owners may raise it; anyone may
        // bump a public file's counter by exactly one.
        let ownership = match (counter_only, new_count) {
            (true, Some(count)) => {
                args.push(SqlValue::Text(id.to_string()));
                args.push(SqlValue::Text(user.id));
                args.push(SqlValue::Integer(count));
                args.push(SqlValue::Integer(count - 1));
                "((user_id = ? AND download_count <= ?) OR (is_public = 1 AND download_count = ?))"
            }
            (false, Some(count)) => {
                args.push(SqlValue::Text(id.to_string()));
                args.push(SqlValue::Text(user.id));
                args.push(SqlValue::Integer(count));
                "user_id = ? AND download_count <= ?"
            }
            (_, None) => {
                args.push(SqlValue::Text(id.to_string()));
                args.push(SqlValue::Text(user.id));
                "user_id = ?"
            }
        };
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ? AND {}",
            table.name(),
            assignments.join(", "),
            ownership
        );

        let mut q = sqlx::query(&sql);
        for arg in args {
            q = bind_value(q, arg);
        }

        let rows = q
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?
            .rows_affected();

        if rows == 0 {
            return Err(AppError::Authorization(format!("{} row {} not found", table, id)));
        }

        tracing::debug!("Updated {} row {}", table, id);
        Ok(())
    }

    async fn delete(&self, table: Table, id: &str) -> Result<()> {
        let user = self.require_caller().await?;

        let sql = format!("DELETE FROM {} WHERE id = ? AND user_id = ?", table.name());
        let rows = sqlx::query(&sql)
            .bind(id)
            .bind(&user.id)
            .execute(&self.pool)
            .await
            .map_err(map_write_error)?
            .rows_affected();

        if rows == 0 {
            return Err(AppError::Authorization(format!("{} row {} not found", table, id)));
        }

        tracing::debug!("Deleted {} row {}", table, id);
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalBackend {
    async fn put(&self, path: &str, bytes: &[u8], media_type: &str) -> Result<()> {
        let user = self.require_caller().await?;

        if Self::owner_of(path) != Some(user.id.as_str()) {
            return Err(AppError::Authorization(format!(
                "Uploads must be stored under {}/",
                user.id
            )));
        }

        self.blobs.write(path, bytes).await?;
        tracing::debug!("Stored object {} ({}, {} bytes)", path, media_type, bytes.len());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let caller = self.caller().await;
        let owns = matches!(
            (&caller, Self::owner_of(path)),
            (Some(user), Some(owner)) if user.id == owner
        );

        if !owns && !self.object_is_public(path).await? {
            return Err(AppError::Authorization(format!("Object not found: {}", path)));
        }

        match self.blobs.read(path).await {
            Err(AppError::BlobStore(_)) => {
                Err(AppError::Authorization(format!("Object not found: {}", path)))
            }
            other => other,
        }
    }

    async fn remove(&self, paths: &[String]) -> Result<()> {
        let user = self.require_caller().await?;

        for path in paths {
            if Self::owner_of(path) != Some(user.id.as_str()) {
                return Err(AppError::Authorization(format!("Object not found: {}", path)));
            }
        }
        for path in paths {
            self.blobs.delete(path).await?;
        }

        tracing::debug!("Removed {} object(s)", paths.len());
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        let full: PathBuf = self.blobs.root().join(path);
        format!("file://{}", full.display())
    }
}
