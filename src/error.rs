//! Error types for the FSx volume driver
//!
//! Provides a single structured error enum for every component (parameter
//! validation, the identity codec, the backing service client, scratch
//! mounts and the API surface) plus the closed [`ErrorKind`] taxonomy that
//! callers switch on.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Unified error type for the driver
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter {key}={value:?}: {reason}")]
    InvalidParameter {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Unrecognized parameter: {0}")]
    UnknownParameter(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Malformed volume id {volume_id:?}: expected {expected}")]
    MalformedVolumeId { volume_id: String, expected: String },

    #[error("Volume id field {field:?} must not contain {delimiter:?}")]
    DelimiterInField { field: String, delimiter: char },

    #[error("Unsupported volume capability: {0}")]
    UnsupportedCapability(String),

    #[error("Capacity out of range: {0}")]
    CapacityOutOfRange(String),

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("Filesystem for volume {name} already exists with different parameters: {reason}")]
    FilesystemConflict { name: String, reason: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    // =========================================================================
    // Concurrency Errors
    // =========================================================================
    #[error("An operation with the given key {key} is already in progress")]
    OperationInProgress { key: String },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("Deadline exceeded for {operation} after {timeout:?}")]
    DeadlineExceeded { operation: String, timeout: Duration },

    // =========================================================================
    // Backing Service Errors
    // =========================================================================
    #[error("Timed out waiting for filesystem {filesystem_id} to {action}; last observed state: {last_state}")]
    WaitTimeout {
        filesystem_id: String,
        action: String,
        last_state: String,
    },

    #[error("Filesystem {filesystem_id} entered unexpected state {state} while waiting to {action}")]
    UnexpectedState {
        filesystem_id: String,
        action: String,
        state: String,
    },

    #[error("Resize of filesystem {filesystem_id} to {target_gib} GiB failed: {message}")]
    ResizeFailed {
        filesystem_id: String,
        target_gib: u64,
        message: String,
    },

    #[error("Backing service operation failed: {operation}: {reason}")]
    BackendOperationFailed { operation: String, reason: String },

    #[error("Backing service connection error: {0}")]
    BackendConnection(#[from] reqwest::Error),

    // =========================================================================
    // Local Mount Errors
    // =========================================================================
    #[error("Mount of {source_path} at {target} failed: {reason}")]
    Mount {
        source_path: String,
        target: String,
        reason: String,
    },

    #[error("Unmount of {target} failed: {reason}")]
    Unmount { target: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Not implemented: {0}")]
    Unimplemented(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Metrics registration error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Closed status taxonomy of the inbound surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    OutOfRange,
    /// Another operation holds the same in-flight key; retry later
    Aborted,
    DeadlineExceeded,
    Cancelled,
    Internal,
    Unimplemented,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::OutOfRange => "out_of_range",
            ErrorKind::Aborted => "aborted",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
            ErrorKind::Unimplemented => "unimplemented",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response contract handed back to the orchestrator: a kind plus a
/// human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for Status {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl Error {
    /// Map this error onto the status taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MissingParameter(_)
            | Error::InvalidParameter { .. }
            | Error::UnknownParameter(_)
            | Error::InvalidRequest(_)
            | Error::MalformedVolumeId { .. }
            | Error::DelimiterInField { .. }
            | Error::UnsupportedCapability(_) => ErrorKind::InvalidArgument,

            Error::CapacityOutOfRange(_) => ErrorKind::OutOfRange,

            Error::FilesystemConflict { .. } | Error::ResourceExists { .. } => {
                ErrorKind::AlreadyExists
            }

            Error::ResourceNotFound { .. } => ErrorKind::NotFound,

            Error::OperationInProgress { .. } => ErrorKind::Aborted,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,

            Error::Unimplemented(_) => ErrorKind::Unimplemented,

            Error::WaitTimeout { .. }
            | Error::UnexpectedState { .. }
            | Error::ResizeFailed { .. }
            | Error::BackendOperationFailed { .. }
            | Error::BackendConnection(_)
            | Error::Mount { .. }
            | Error::Unmount { .. }
            | Error::Internal(_)
            | Error::Configuration(_)
            | Error::Metrics(_)
            | Error::JsonParse(_)
            | Error::YamlParse(_)
            | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Check whether a caller may usefully retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Aborted
                | ErrorKind::DeadlineExceeded
                | ErrorKind::Cancelled
                | ErrorKind::Internal
        )
    }

    /// Check if this is a not-found error
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Result type alias for the driver
pub type Result<T> = std::result::Result<T, Error>;
