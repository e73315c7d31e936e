//! Database error types.

use ferrodock_common::DockingError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid record in {table}: {reason}")]
    InvalidRecord { table: &'static str, reason: String },

    #[error("Quota exceeded for {user_id}: {active} active + {requested} requested > {limit}")]
    QuotaExceeded {
        user_id: String,
        active: u64,
        requested: u64,
        limit: u64,
    },
}

impl From<DbError> for DockingError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::QuotaExceeded { user_id, active, requested, limit } => {
                DockingError::LimitExceeded { user_id, active, requested, limit }
            }
            DbError::Serialization(e) => DockingError::Serialization(e),
            other => DockingError::Database(other.to_string()),
        }
    }
}
