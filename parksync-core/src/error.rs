//! Error taxonomy shared by every sync component
//!
//! Five kinds, no more:
//! - `Network`    : no response at all (connection refused, timeout)
//! - `Api`        : the server answered with a failure status or `success: false`
//! - `Validation` : 4xx carrying field-level detail
//! - `Decode`     : the body could not be read as the expected shape
//! - `NotFound`   : update/delete target is missing (recoverable)
//!
//! Server messages are carried verbatim so the UI can show them as-is.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Fieldless discriminant used by callers to branch on the failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Api,
    Validation,
    Decode,
    NotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Network => "network",
            ErrorKind::Api => "api",
            ErrorKind::Validation => "validation",
            ErrorKind::Decode => "decode",
            ErrorKind::NotFound => "not_found",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("network error: {message}")]
    Network {
        message: String,
        /// The request may have reached the server; its outcome is unknown
        timed_out: bool,
    },
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("validation failed: {message}")]
    Validation {
        fields: BTreeMap<String, String>,
        message: String,
    },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl SyncError {
    pub fn network(message: impl Into<String>) -> Self {
        SyncError::Network {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        SyncError::Network {
            message: message.into(),
            timed_out: true,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Network { .. } => ErrorKind::Network,
            SyncError::Api { .. } => ErrorKind::Api,
            SyncError::Validation { .. } => ErrorKind::Validation,
            SyncError::Decode(_) => ErrorKind::Decode,
            SyncError::NotFound(_) => ErrorKind::NotFound,
        }
    }

    /// Message as reported by the server (or transport), without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            SyncError::Network { message, .. } => message,
            SyncError::Api { message, .. } => message,
            SyncError::Validation { message, .. } => message,
            SyncError::Decode(message) => message,
            SyncError::NotFound(message) => message,
        }
    }

    /// True when a mutation may or may not have been applied server-side.
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(self, SyncError::Network { timed_out: true, .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SyncError::Api { status: 401, .. })
    }

    /// Every failure in the sync core is scoped to one resource or one mutation.
    pub fn is_recoverable(&self) -> bool {
        true
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::timed_out(e.to_string())
        } else if e.is_decode() {
            SyncError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            SyncError::Api {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            SyncError::network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Decode(e.to_string())
    }
}
