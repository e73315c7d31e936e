//! ferrodock Database Layer
//!
//! Durable storage for docking jobs and their poses on SQLite, accessed
//! through sqlx. Every mutation is a single read-modify-write inside one
//! transaction; no other process-wide job state exists.
//!
//! # Example
//!
//! ```rust,no_run
//! use ferrodock_db::{Database, JobRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::open("sqlite://ferrodock.db", 5).await?;
//!     db.initialize().await?;
//!
//!     let jobs = JobRepository::new(std::sync::Arc::new(db));
//!     println!("{} jobs stored", jobs.count().await?);
//!     Ok(())
//! }
//! ```

pub mod database;
pub mod error;
pub mod schema;
pub mod jobs;
pub mod poses;

pub use database::{Database, DatabaseStats};
pub use error::{DbError, Result};
pub use schema::{Job, JobFilter, Pose, TABLE_JOBS, TABLE_POSES};
pub use jobs::{JobRepository, QuotaCheck};
pub use poses::{PoseRepository, RankedPose};
