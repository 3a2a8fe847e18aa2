//! Storage interface for the chain core.

pub mod errors;
pub mod traits;

#[cfg(any(test, feature = "stubs"))]
pub mod stubs;

/// Wrapper result type for database operations.
pub type DbResult<T> = anyhow::Result<T, errors::DbError>;

pub use errors::DbError;
