//! Error taxonomy: one `thiserror` enum, one coarse `ErrorKind`
//! tag carried independently of the Rust error type structure so Steps and
//! Events can record it without matching the enum, for call sites that only
//! need a retryable/fatal classification.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ProviderError,
    ToolError,
    ValidationError,
    TimeoutError,
    PermissionError,
    SystemError,
}

impl ErrorKind {
    /// Fatal kinds never retry regardless of policy.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::ValidationError | ErrorKind::PermissionError | ErrorKind::SystemError
        )
    }
}

#[derive(Error, Debug)]
pub enum ShuttleError {
    #[error("provider error: {0}")]
    Provider(String),
    #[error("tool error: {0}")]
    Tool(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("system error: {0}")]
    System(String),
    #[error("node type {0:?} has no registered executor")]
    ExecutorNotFound(crate::model::NodeType),
    #[error("node {0} not found")]
    NodeNotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("non-monotonic run state transition: {from:?} -> {to:?}")]
    NonMonotonicTransition {
        from: crate::model::RunState,
        to: crate::model::RunState,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl ShuttleError {
    /// Coarse classification used for retry decisions and Step/Event tagging.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShuttleError::Provider(_) => ErrorKind::ProviderError,
            ShuttleError::Tool(_) => ErrorKind::ToolError,
            ShuttleError::Validation(_) => ErrorKind::ValidationError,
            ShuttleError::Timeout(_) => ErrorKind::TimeoutError,
            ShuttleError::Permission(_) => ErrorKind::PermissionError,
            ShuttleError::System(_)
            | ShuttleError::ExecutorNotFound(_)
            | ShuttleError::NodeNotFound(_)
            | ShuttleError::Storage(_)
            | ShuttleError::NonMonotonicTransition { .. }
            | ShuttleError::Io(_)
            | ShuttleError::Json(_)
            | ShuttleError::Sqlite(_) => ErrorKind::SystemError,
        }
    }
}
