//! Remote store interfaces
//!
//! The vault never persists anything itself. Identity, relational tables
//! and object storage are external collaborators reached through the
//! three traits below. Ownership and visibility rules are enforced behind
//! these traits, never by the caller.
//!
//! Two implementations exist:
//! - `rest::RestBackend` talks to the hosted services over HTTP
//! - `local::LocalBackend` keeps everything in SQLite and on disk

pub mod local;
pub mod rest;

pub use local::LocalBackend;
pub use rest::RestBackend;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// A table row as exchanged with the relational store
pub type Row = Map<String, Value>;

/// Identity of the signed-in user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
}

/// Vault tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Notes,
    Files,
    Folders,
    Tags,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Notes => "notes",
            Table::Files => "files",
            Table::Folders => "folders",
            Table::Tags => "tags",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// Equality filters plus an optional ordering
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<(String, Value)>,
    pub order: Option<Order>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only rows where `column` equals `value`
    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push((column.to_string(), value.into()));
        self
    }

    pub fn order_desc(mut self, column: &str) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            descending: true,
        });
        self
    }

    pub fn order_asc(mut self, column: &str) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            descending: false,
        });
        self
    }
}

/// Identity provider
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Resolve the existing session, if any. May suspend on startup.
    async fn current_session(&self) -> Result<Option<AuthUser>>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser>;

    async fn sign_out(&self) -> Result<()>;
}

/// Relational store with per-row access policy
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Row>>;

    async fn count(&self, table: Table, query: &Query) -> Result<u64>;

    /// Insert a row; the store assigns id and timestamps and returns the full row
    async fn insert(&self, table: Table, row: Row) -> Result<Row>;

    /// Change only the named fields of row `id`
    async fn update(&self, table: Table, id: &str, fields: Row) -> Result<()>;

    async fn delete(&self, table: Table, id: &str) -> Result<()>;
}

/// Durable byte storage
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8], media_type: &str) -> Result<()>;

    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    async fn remove(&self, paths: &[String]) -> Result<()>;

    /// Deterministic URL, readable without auth when the owning row is public
    fn public_url(&self, path: &str) -> String;
}

/// Configured handle to all three remote services
#[derive(Clone)]
pub struct RemoteClient {
    pub identity: Arc<dyn IdentityService>,
    pub tables: Arc<dyn TableStore>,
    pub objects: Arc<dyn ObjectStore>,
}

impl RemoteClient {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        tables: Arc<dyn TableStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            identity,
            tables,
            objects,
        }
    }

    /// Use one backend value for all three services
    pub fn from_backend<B>(backend: B) -> Self
    where
        B: IdentityService + TableStore + ObjectStore + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            identity: backend.clone(),
            tables: backend.clone(),
            objects: backend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_builder() {
        let query = Query::new()
            .eq("user_id", "u1")
            .eq("is_public", true)
            .order_desc("created_at");

        assert_eq!(query.filters.len(), 2);
        assert_eq!(query.filters[1], ("is_public".to_string(), json!(true)));
        assert_eq!(
            query.order,
            Some(Order {
                column: "created_at".to_string(),
                descending: true
            })
        );
    }

    #[test]
    fn test_table_names() {
        assert_eq!(Table::Notes.to_string(), "notes");
        assert_eq!(Table::Files.name(), "files");
    }
}
