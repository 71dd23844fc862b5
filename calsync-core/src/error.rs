//! Error types for calsync.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in calsync operations.
#[derive(Error, Debug)]
pub enum CalSyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider '{0}' not found in PATH")]
    ProviderNotInstalled(String),

    #[error("Provider request timed out after {0}s")]
    ProviderTimeout(u64),

    #[error("Source fetch error: {0}")]
    Source(String),

    #[error("Remote calendar error: {0}")]
    Remote(RemoteError),

    #[error("Job handler failed: {0}")]
    Handler(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CalSyncError {
    fn from(e: serde_json::Error) -> Self {
        CalSyncError::Serialization(e.to_string())
    }
}

/// A status-coded failure reported by the remote calendar store.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// HTTP-equivalent status code, if the store reported one.
    pub status: Option<u16>,
    /// Machine-readable reason code (e.g. `rateLimitExceeded`).
    pub reason: Option<String>,
    /// Explicit wait hint sent with the failure.
    pub retry_after: Option<Duration>,
    pub message: String,
}

impl RemoteError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        RemoteError {
            status: Some(status),
            reason: None,
            retry_after: None,
            message: message.into(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_retry_after(mut self, wait: Duration) -> Self {
        self.retry_after = Some(wait);
        self
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, &self.reason) {
            (Some(status), Some(reason)) => write!(f, "{} ({}): {}", status, reason, self.message),
            (Some(status), None) => write!(f, "{}: {}", status, self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl From<RemoteError> for CalSyncError {
    fn from(e: RemoteError) -> Self {
        CalSyncError::Remote(e)
    }
}

/// Result type alias for calsync operations.
pub type CalSyncResult<T> = Result<T, CalSyncError>;
