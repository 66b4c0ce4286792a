//! Typed error type for the db crate.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    /// The row changed since it was read (optimistic version check failed).
    #[error("concurrent update of row {0}")]
    Conflict(Uuid),

    /// The row is still referenced and cannot be deleted.
    #[error("row is still referenced: {0}")]
    InUse(String),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
