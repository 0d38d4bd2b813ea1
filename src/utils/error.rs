// src/utils/error.rs

use rusqlite::ErrorCode;
use thiserror::Error;

pub type LeadFlowResult<T> = Result<T, LeadFlowError>;

/// Main error type for the lead distribution engine.
///
/// `StorageUnavailable` is the only transient kind: callers that hold a
/// retry budget (the store transaction loop) retry it, everyone else
/// propagates. Integrity conflicts surface as `AlreadyDistributed` so the
/// rotator can treat a concurrent duplicate insert as a no-op.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LeadFlowError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("lead {lead_id} already distributed to recipient {recipient_id}")]
    AlreadyDistributed { lead_id: i64, recipient_id: i64 },

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LeadFlowError {
    // Convenience constructors for common error kinds
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::StorageUnavailable(message.into())
    }

    pub fn storage_error(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn already_distributed(lead_id: i64, recipient_id: i64) -> Self {
        Self::AlreadyDistributed {
            lead_id,
            recipient_id,
        }
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::QuotaExceeded(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn serialization_error(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

impl From<rusqlite::Error> for LeadFlowError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
            {
                LeadFlowError::StorageUnavailable(err.to_string())
            }
            _ => LeadFlowError::Storage(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for LeadFlowError {
    fn from(err: serde_json::Error) -> Self {
        LeadFlowError::Serialization(err.to_string())
    }
}

/// True for SQLite constraint failures (duplicate unique key and friends).
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}
