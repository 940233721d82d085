//! Error types for the swapmatch core

use thiserror::Error;
use uuid::Uuid;

/// Main error type for targeting, resolution and settlement operations
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("user {user_id} is not allowed to {action}")]
    Authorization { user_id: Uuid, action: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("targeting {source_id} -> {target_id} would close a cycle")]
    Cycle { source_id: Uuid, target_id: Uuid },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("auction window closed: {0}")]
    Expired(String),

    #[error("illegal settlement transition from {from} to {to}")]
    Settlement { from: String, to: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl CoreError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Unavailable(_))
    }

    /// Check if the caller can fix the request and resubmit
    pub fn is_client_error(&self) -> bool {
        !matches!(self, CoreError::Unavailable(_))
    }

    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        CoreError::NotFound { kind, id }
    }

    pub fn unauthorized(user_id: Uuid, action: impl Into<String>) -> Self {
        CoreError::Authorization {
            user_id,
            action: action.into(),
        }
    }
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
