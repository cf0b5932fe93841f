//! Error types for the fanout-db crate.

use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to establish or acquire a database connection.
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[source] sqlx::Error),

    /// A database migration failed to apply.
    #[error("Migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    /// A database query failed to execute.
    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl DbError {
    /// Check if this error indicates a connection problem.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DbError::ConnectionFailed(_))
    }

    /// Check if this error indicates a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound(_))
    }
}

/// Check whether an sqlx error is a unique constraint violation.
///
/// Used to translate duplicate event ids into a domain-level duplicate
/// error instead of a generic database failure.
#[must_use]
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}
