use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by the REST collaborator for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(Some(status), message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    /// Transport failures, timeouts, throttling and server errors can be retried as-is.
    pub fn is_retryable(&self) -> bool {
        match self.status {
            None => true,
            Some(408) | Some(429) => true,
            Some(code) => code >= 500,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (status {})", self.message, status),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|status| status.as_u16());
        RemoteError::new(status, err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote request failed: {0}")]
    Remote(RemoteError),

    #[error("Remote request timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Malformed push event: {0}")]
    MalformedEvent(String),

    #[error("Push transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Whether the user can simply repeat the action that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(err) => err.is_retryable(),
            SyncError::Timeout(_) | SyncError::Transport(_) => true,
            _ => false,
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        SyncError::Remote(err)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Remote(RemoteError::from(err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification_follows_status() {
        assert!(RemoteError::network("connection reset").is_retryable());
        assert!(RemoteError::http(503, "unavailable").is_retryable());
        assert!(RemoteError::http(429, "slow down").is_retryable());
        assert!(!RemoteError::http(400, "bad request").is_retryable());
        assert!(!RemoteError::http(404, "missing").is_retryable());
    }

    #[test]
    fn sync_error_retryable_delegates_to_remote() {
        assert!(SyncError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(SyncError::Remote(RemoteError::http(500, "boom")).is_retryable());
        assert!(!SyncError::Validation("title".into()).is_retryable());
    }

    #[test]
    fn timeout_display_keeps_sub_second_precision() {
        let err = SyncError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Remote request timed out after 250 ms");
    }

    #[test]
    fn remote_error_display_includes_status() {
        let err = RemoteError::http(403, "Forbidden");
        assert_eq!(err.to_string(), "Forbidden (status 403)");
        assert_eq!(RemoteError::network("offline").to_string(), "offline");
    }
}
