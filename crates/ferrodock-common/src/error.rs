use thiserror::Error;
use uuid::Uuid;

use crate::status::JobStatus;

#[derive(Debug, Error)]
pub enum DockingError {
    /// Malformed structure/notation input or a missing required file.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown job id, or a job the caller does not own.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Queue limit exceeded for user {user_id}: {active} active + {requested} requested > {limit}")]
    LimitExceeded {
        user_id: String,
        active: u64,
        requested: u64,
        limit: u64,
    },

    #[error("Cannot {action} job {job_id} in state {status}")]
    InvalidState {
        job_id: Uuid,
        status: JobStatus,
        action: String,
    },

    /// Engine exited non-zero, timed out, or could not be found.
    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DockingError {
    pub fn not_found(job_id: Uuid) -> Self {
        DockingError::NotFound(format!("job {job_id}"))
    }

    /// Quota rejections clear up once queued work drains; callers may retry later.
    pub fn is_retryable_later(&self) -> bool {
        matches!(self, DockingError::LimitExceeded { .. })
    }

    /// Errors that will fail identically on every retry.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            DockingError::Validation(_) | DockingError::NotFound(_) | DockingError::InvalidState { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DockingError>;
