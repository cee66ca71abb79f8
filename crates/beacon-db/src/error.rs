//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<beacon_core::Error> for DbError {
    fn from(err: beacon_core::Error) -> Self {
        DbError::InvalidRow(err.to_string())
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
