//! Error types for taskq
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, bad config, invalid title, unknown task)
//! - 4: Operation failed (remote rejected or unavailable, IO, parse errors)

use thiserror::Error;

use crate::queue::Abandoned;
use crate::task::TaskId;

/// Exit codes for the taskq CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for taskq operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid title: {0}")]
    InvalidTitle(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Invalid mutation transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // Operation failures (exit code 4)
    #[error("Remote rejected request: {0}")]
    RemoteRejected(String),

    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Operation abandoned before it settled")]
    Abandoned,

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            // User errors
            Error::InvalidArgument(_)
            | Error::InvalidConfig(_)
            | Error::InvalidTitle(_)
            | Error::TaskNotFound(_)
            | Error::InvalidTransition { .. } => exit_codes::USER_ERROR,

            // Operation failures
            Error::RemoteRejected(_)
            | Error::RemoteUnavailable(_)
            | Error::Abandoned
            | Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Structured details for JSON output, when the error carries any.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::TaskNotFound(id) => Some(serde_json::json!({ "task_id": id })),
            Error::InvalidTransition { from, to } => {
                Some(serde_json::json!({ "from": from, "to": to }))
            }
            _ => None,
        }
    }
}

// Remote and queue failures are shared between the settled action, the
// controller, and every notice that mentions them, so the error stays `Clone`
// and the foreign error types are flattened to their messages.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::TomlParse(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::TomlSerialize(err.to_string())
    }
}

impl From<Abandoned> for Error {
    fn from(_: Abandoned) -> Self {
        Error::Abandoned
    }
}

/// Result type alias for taskq operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.to_string(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
