use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Not ready: no tenant key")]
    NotReady,

    #[error("Query error: {0}")]
    Query(String),

    #[error("Write error: {0}")]
    Write(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Record '{0}' not found")]
    RecordNotFound(String),

    #[error("Field '{0}' cannot be edited locally")]
    ImmutableField(String),

    #[error("Edit already in flight for '{record_id}.{field}'")]
    EditInFlight { record_id: String, field: String },

    #[error("Synchronizer stopped")]
    Stopped,

    #[error("Webhook returned '{status}': {message}")]
    Webhook { status: String, message: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Transport-level failures worth retrying; business outcomes are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for SyncError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Http(format!("request timed out: {err}"));
        }
        Self::Http(err.to_string())
    }
}
