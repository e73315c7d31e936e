//! ferrodock Common - Shared value objects and the error taxonomy used across all ferrodock crates.

pub mod error;
pub mod params;
pub mod status;

// Re-export commonly used types
pub use error::{DockingError, Result};
pub use params::{DockingParams, GridBoxParams};
pub use status::JobStatus;
