//! Database migration management.
//!
//! Migrations are embedded at compile time from the `migrations/`
//! directory and applied in filename order.

use sqlx::PgPool;

use crate::error::DbError;

/// Run all pending database migrations.
///
/// # Errors
///
/// Returns [`DbError::MigrationFailed`] if any migration fails to apply.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(DbError::MigrationFailed)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    // Migration tests require a real database and live in the
    // integration-gated suites.
}
