//! Hosted backend
//!
//! Talks to the hosted identity (`/auth/v1`), table (`/rest/v1`) and
//! storage (`/storage/v1`) services over HTTPS. Every request carries the
//! project's anon key; once signed in, the user's access token is sent as
//! the bearer so the row-level policies apply to that user.

use super::{AuthUser, IdentityService, ObjectStore, Query, Row, Table, TableStore};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct RemoteUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl From<RemoteUser> for AuthUser {
    fn from(user: RemoteUser) -> Self {
        AuthUser {
            id: user.id,
            email: user.email.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: RemoteUser,
}

/// HTTP client for the hosted services
#[derive(Clone)]
pub struct RestBackend {
    http: Client,
    base: Url,
    anon_key: String,
    bucket: String,
    /// Access token of the signed-in user
    session: Arc<RwLock<Option<String>>>,
}

impl RestBackend {
    pub fn new(base: Url, anon_key: impl Into<String>, bucket: impl Into<String>) -> Result<Self> {
        if base.cannot_be_a_base() {
            return Err(AppError::Config(format!("Remote URL cannot be used as a base: {}", base)));
        }

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base,
            anon_key: anon_key.into(),
            bucket: bucket.into(),
            session: Arc::new(RwLock::new(None)),
        })
    }

    /// Resume a previously persisted session token.
    ///
    /// The token is validated lazily by `current_session`.
    pub async fn restore_session(&self, access_token: impl Into<String>) {
        *self.session.write().await = Some(access_token.into());
    }

    /// Access token of the signed-in user, for persisting between runs
    pub async fn access_token(&self) -> Option<String> {
        self.session.read().await.clone()
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        endpoint(&self.base, segments)
    }

    fn object_url(&self, path: &str) -> Url {
        let mut segments = vec!["storage", "v1", "object", self.bucket.as_str()];
        segments.extend(path.split('/'));
        self.endpoint(&segments)
    }

    async fn bearer(&self) -> String {
        self.access_token()
            .await
            .unwrap_or_else(|| self.anon_key.clone())
    }

    /// Attach the anon key and bearer token
    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let mut headers = HeaderMap::new();
        if let Ok(key) = HeaderValue::from_str(&self.anon_key) {
            headers.insert("apikey", key);
        }
        if let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {}", self.bearer().await)) {
            headers.insert(AUTHORIZATION, bearer);
        }
        request.headers(headers)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorized(request).await.send().await?;
        check_status(response).await
    }

    async fn store_token(&self, token: TokenResponse) -> AuthUser {
        *self.session.write().await = Some(token.access_token);
        token.user.into()
    }
}

/// Build a URL below `base` from raw path segments (each is percent-encoded)
fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty();
        path.extend(segments);
    }
    url
}

/// Render a filter value in the REST filter dialect
fn filter_param(column: &str, value: &Value) -> (String, String) {
    let operand = match value {
        Value::Null => return (column.to_string(), "is.null".to_string()),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    (column.to_string(), format!("eq.{}", operand))
}

fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = query
        .filters
        .iter()
        .map(|(column, value)| filter_param(column, value))
        .collect();

    if let Some(order) = &query.order {
        let direction = if order.descending { "desc" } else { "asc" };
        params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
    }

    params
}

/// Total from a `Content-Range` header such as `0-9/42` or `*/0`
fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

/// Pull a human message out of an error body from any of the services
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["message", "error_description", "msg", "error"] {
            if let Some(message) = value.get(key).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }
    if body.trim().is_empty() {
        "empty response".to_string()
    } else {
        body.trim().to_string()
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    tracing::debug!("Remote request failed with {}: {}", status, message);

    // Storage reports duplicate objects as a 400 with a "Duplicate" error
    if status.as_u16() == 400 && message.to_lowercase().contains("duplicate") {
        return Err(AppError::Conflict(message));
    }

    Err(AppError::from_status(status.as_u16(), message))
}

#[async_trait]
impl IdentityService for RestBackend {
    async fn current_session(&self) -> Result<Option<AuthUser>> {
        let Some(token) = self.access_token().await else {
            return Ok(None);
        };

        let request = self
            .http
            .get(self.endpoint(&["auth", "v1", "user"]))
            .bearer_auth(&token)
            .header("apikey", &self.anon_key);

        let response = request.send().await?;
        match check_status(response).await {
            Ok(response) => {
                let user: AuthUser = response.json::<RemoteUser>().await?.into();
                Ok(Some(user))
            }
            Err(AppError::Authorization(message)) => {
                tracing::info!("Stored session is no longer valid: {}", message);
                *self.session.write().await = None;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        let mut url = self.endpoint(&["auth", "v1", "token"]);
        url.query_pairs_mut().append_pair("grant_type", "password");

        let request = self
            .http
            .post(url)
            .json(&json!({ "email": email.trim(), "password": password }));

        let token: TokenResponse = self.send(request).await?.json().await?;
        let user = self.store_token(token).await;

        tracing::info!("Signed in: {}", user.id);
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser> {
        let request = self
            .http
            .post(self.endpoint(&["auth", "v1", "signup"]))
            .json(&json!({ "email": email.trim(), "password": password }));

        let body: Value = self.send(request).await?.json().await?;

        if body.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(body)?;
            let user = self.store_token(token).await;
            tracing::info!("Registered and signed in: {}", user.id);
            return Ok(user);
        }

        Err(AppError::Authorization(
            "Account created; confirm the email address before signing in".to_string(),
        ))
    }

    async fn sign_out(&self) -> Result<()> {
        let had_session = self.access_token().await.is_some();
        let result = if had_session {
            let request = self.http.post(self.endpoint(&["auth", "v1", "logout"]));
            self.send(request).await.map(|_| ())
        } else {
            Ok(())
        };

        // The local session is dropped even when the logout call fails
        *self.session.write().await = None;
        result
    }
}

#[async_trait]
impl TableStore for RestBackend {
    async fn select(&self, table: Table, query: &Query) -> Result<Vec<Row>> {
        let mut params = query_params(query);
        params.push(("select".to_string(), "*".to_string()));

        let request = self
            .http
            .get(self.endpoint(&["rest", "v1", table.name()]))
            .query(&params);

        let rows: Vec<Row> = self.send(request).await?.json().await?;
        tracing::debug!("Selected {} row(s) from {}", rows.len(), table);
        Ok(rows)
    }

    async fn count(&self, table: Table, query: &Query) -> Result<u64> {
        let mut params = query_params(query);
        params.retain(|(key, _)| key != "order");
        params.push(("select".to_string(), "id".to_string()));

        let request = self
            .http
            .head(self.endpoint(&["rest", "v1", table.name()]))
            .query(&params)
            .header("Prefer", "count=exact");

        let response = self.send(request).await?;
        let range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Generic("Count response missing Content-Range".to_string()))?;

        parse_content_range(range)
            .ok_or_else(|| AppError::Generic(format!("Unparsable Content-Range: {}", range)))
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row> {
        let request = self
            .http
            .post(self.endpoint(&["rest", "v1", table.name()]))
            .header("Prefer", "return=representation")
            .json(&row);

        let mut rows: Vec<Row> = self.send(request).await?.json().await?;
        let inserted = rows
            .pop()
            .ok_or_else(|| AppError::Generic(format!("Insert into {} returned no row", table)))?;

        tracing::debug!("Inserted into {}", table);
        Ok(inserted)
    }

    async fn update(&self, table: Table, id: &str, fields: Row) -> Result<()> {
        let request = self
            .http
            .patch(self.endpoint(&["rest", "v1", table.name()]))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(&fields);

        // A policy-filtered update succeeds with zero rows
        let rows: Vec<Row> = self.send(request).await?.json().await?;
        if rows.is_empty() {
            return Err(AppError::Authorization(format!("{} row {} not found", table, id)));
        }

        tracing::debug!("Updated {} row {}", table, id);
        Ok(())
    }

    async fn delete(&self, table: Table, id: &str) -> Result<()> {
        let request = self
            .http
            .delete(self.endpoint(&["rest", "v1", table.name()]))
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation");

        let rows: Vec<Row> = self.send(request).await?.json().await?;
        if rows.is_empty() {
            return Err(AppError::Authorization(format!("{} row {} not found", table, id)));
        }

        tracing::debug!("Deleted {} row {}", table, id);
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for RestBackend {
    async fn put(&self, path: &str, bytes: &[u8], media_type: &str) -> Result<()> {
        let request = self
            .http
            .post(self.object_url(path))
            .header(CONTENT_TYPE, media_type)
            .header("x-upsert", "false")
            .body(bytes.to_vec());

        self.send(request).await?;
        tracing::debug!("Stored object {} ({} bytes)", path, bytes.len());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let request = self.http.get(self.object_url(path));
        let bytes = self.send(request).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn remove(&self, paths: &[String]) -> Result<()> {
        let request = self
            .http
            .delete(self.endpoint(&["storage", "v1", "object", self.bucket.as_str()]))
            .json(&json!({ "prefixes": paths }));

        self.send(request).await?;
        tracing::debug!("Removed {} object(s)", paths.len());
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        let mut segments = vec!["storage", "v1", "object", "public", self.bucket.as_str()];
        segments.extend(path.split('/'));
        self.endpoint(&segments).to_string()
    }
}
