//! Error types shared by the sync core.

use thiserror::Error;

/// Errors that can occur while fetching, subscribing or reconciling.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// The backend has no URL or API key configured
    #[error("Backend not configured. Set backend.url and backend.api_key in config.")]
    NotConfigured,
    /// A fetch-by-filter request failed
    #[error("Fetch failed for '{resource}': {reason}")]
    FetchFailed { resource: String, reason: String },
    /// The change feed channel could not be opened
    #[error("Subscribe failed for '{resource}': {reason}")]
    SubscribeFailed { resource: String, reason: String },
    /// An open change feed channel went away
    #[error("Channel dropped: {0}")]
    ChannelDropped(String),
    /// An update or delete referenced a key that is not in the snapshot
    #[error("No record with key '{key}' in '{resource}'")]
    ApplyConflict { resource: String, key: String },
    /// A feed or query payload did not match the resource schema
    #[error("Invalid payload for '{resource}': {reason}")]
    InvalidPayload { resource: String, reason: String },
    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(String),
    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

impl SyncError {
    /// Returns true for errors the connection monitor retries through backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::FetchFailed { .. }
                | SyncError::SubscribeFailed { .. }
                | SyncError::ChannelDropped(_)
                | SyncError::Http(_)
                | SyncError::WebSocket(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(SyncError::ChannelDropped("eof".to_string()).is_transient());
        assert!(SyncError::FetchFailed {
            resource: "farms".to_string(),
            reason: "timeout".to_string()
        }
        .is_transient());
        assert!(!SyncError::NotConfigured.is_transient());
        assert!(!SyncError::ApplyConflict {
            resource: "farms".to_string(),
            key: "f1".to_string()
        }
        .is_transient());
    }

    #[test]
    fn test_display_messages() {
        let err = SyncError::ApplyConflict {
            resource: "farms".to_string(),
            key: "f9".to_string(),
        };
        assert_eq!(err.to_string(), "No record with key 'f9' in 'farms'");
        assert!(SyncError::NotConfigured
            .to_string()
            .contains("Backend not configured"));
    }
}
