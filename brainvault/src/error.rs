//! Error types for BrainVault
//!
//! All errors use thiserror for structured error handling.
//! These errors can be serialized to the frontend as plain messages.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Network failure or service unavailable
    #[error("Transport error: {0}")]
    Transport(String),

    /// Row not owned, row missing, or session invalid. The remote policy
    /// layer does not let the client tell these apart.
    #[error("Not found or not permitted: {0}")]
    Authorization(String),

    /// Rejected client-side before any request was sent
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other rejection reported by the remote store
    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Blob store error: {0}")]
    BlobStore(String),

    #[error("{0}")]
    Generic(String),
}

/// Coarse classification used by views when deciding how to report a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Authorization,
    Validation,
    Other,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Transport(_) => ErrorKind::Transport,
            AppError::Authorization(_) => ErrorKind::Authorization,
            AppError::Validation(_) => ErrorKind::Validation,
            _ => ErrorKind::Other,
        }
    }

    /// Map an HTTP status from the hosted backend onto the taxonomy
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 | 404 | 406 => AppError::Authorization(message),
            409 => AppError::Conflict(message),
            408 | 429 | 500..=599 => AppError::Transport(message),
            _ => AppError::Remote { status, message },
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => AppError::from_status(status.as_u16(), err.to_string()),
            None if err.is_decode() => AppError::Generic(format!("Malformed response: {}", err)),
            None => AppError::Transport(err.to_string()),
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::from_status(401, "x").kind(), ErrorKind::Authorization);
        assert_eq!(AppError::from_status(404, "x").kind(), ErrorKind::Authorization);
        assert_eq!(AppError::from_status(503, "x").kind(), ErrorKind::Transport);
        assert!(matches!(AppError::from_status(409, "x"), AppError::Conflict(_)));
        assert!(matches!(
            AppError::from_status(400, "bad"),
            AppError::Remote { status: 400, .. }
        ));
    }

    #[test]
    fn test_serializes_as_message() {
        let err = AppError::Validation("Folder name cannot be empty".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Validation error: Folder name cannot be empty\"");
    }
}
