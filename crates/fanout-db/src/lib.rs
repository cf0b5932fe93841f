//! # fanout-db
//!
//! Persistence layer for the fanout event platform.
//!
//! Provides typed models over PostgreSQL for the append-only event log,
//! webhook endpoints/subscriptions/deliveries, and configurable event
//! actions with their execution history. Models expose async query methods
//! taking a `&PgPool`; multi-tenant tables bind `tenant_id` in every scoped
//! query.
//!
//! The concurrency-critical primitives live here too: claiming unprocessed
//! events and due retries uses `FOR UPDATE SKIP LOCKED` so concurrent
//! workers never double-claim a row.

pub mod error;
pub mod migrations;
pub mod models;

pub use error::DbError;
pub use migrations::run_migrations;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create a connection pool for the given database URL.
///
/// # Errors
///
/// Returns [`DbError::ConnectionFailed`] if the pool cannot be established.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, DbError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(DbError::ConnectionFailed)
}
