//! Error taxonomy for the memory core.
//!
//! Every public operation in the memory engine returns `Result<T, MemoryError>`;
//! the variants map one-to-one onto the HTTP status codes emitted by the
//! server layer. Setup and CLI paths use `anyhow` instead.

use thiserror::Error;

use crate::validation::FieldError;

/// Result alias used throughout the memory core.
pub type MemoryResult<T> = Result<T, MemoryError>;

/// The closed set of failure kinds a memory-core operation can surface.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Input failed schema validation; carries path-accurate field errors.
    #[error("validation failed: {} field error(s)", field_errors.len())]
    Validation { field_errors: Vec<FieldError> },

    /// No memory with this id is visible to the calling user.
    #[error("memory not found: {id}")]
    NotFound { id: String },

    /// The storage layer failed; the enclosing transaction was rolled back.
    #[error("storage operation failed: {0}")]
    StorageFailed(String),

    /// The embedding provider failed or timed out.
    #[error("embedding provider failed: {0}")]
    EmbeddingFailed(String),

    /// A consolidation run already holds the single scheduler slot.
    #[error("consolidation job already in progress")]
    JobInProgress,

    /// System load exceeds the configured consolidation ceiling.
    #[error("system load exceeds consolidation ceiling")]
    LoadThresholdExceeded,

    /// The cron expression handed to the decay scheduler is malformed.
    #[error("invalid cron expression: {0:?}")]
    InvalidCronExpression(String),

    /// Unknown reinforcement type string.
    #[error("invalid reinforcement type: {0:?}")]
    InvalidReinforcementType(String),

    /// Explicit reinforcement was requested without a boost value.
    #[error("explicit reinforcement requires a boost value")]
    BoostRequired,

    /// A long-running operation observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

impl MemoryError {
    /// Build a validation error from a single field error.
    pub fn validation(error: FieldError) -> Self {
        Self::Validation {
            field_errors: vec![error],
        }
    }

    /// Stable machine-readable tag, used by the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::StorageFailed(_) => "STORAGE_FAILED",
            Self::EmbeddingFailed(_) => "EMBEDDING_FAILED",
            Self::JobInProgress => "JOB_IN_PROGRESS",
            Self::LoadThresholdExceeded => "LOAD_THRESHOLD_EXCEEDED",
            Self::InvalidCronExpression(_) => "INVALID_CRON_EXPRESSION",
            Self::InvalidReinforcementType(_) => "INVALID_REINFORCEMENT_TYPE",
            Self::BoostRequired => "BOOST_REQUIRED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl From<rusqlite::Error> for MemoryError {
    fn from(err: rusqlite::Error) -> Self {
        Self::StorageFailed(err.to_string())
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::StorageFailed(format!("serialization: {err}"))
    }
}
