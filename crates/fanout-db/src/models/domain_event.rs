//! `DomainEvent` model: the append-only event log.
//!
//! Events are persisted unprocessed, claimed for dispatch with
//! `FOR UPDATE SKIP LOCKED`, and marked processed once all matched work has
//! been handed off. Payload, type, and aggregate fields are immutable after
//! insert; only the processed flag, claim bookkeeping, and metadata change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// An immutable domain event.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Time-ordered unique identifier (UUID v7).
    pub id: Uuid,
    /// Event type in `category.action` form.
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    /// Optimistic event-sourcing version of the aggregate.
    pub aggregate_version: i32,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    /// User or service that triggered the event.
    pub actor_id: Option<Uuid>,
    /// Tenant/organization scope; `None` for system-wide events.
    pub tenant_id: Option<Uuid>,
    /// Links related events across aggregates.
    pub correlation_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    /// Claim bookkeeping: when and by which worker this event was claimed.
    pub claimed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Data needed to persist a new domain event.
#[derive(Debug, Clone)]
pub struct CreateDomainEvent {
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub aggregate_version: i32,
    pub payload: serde_json::Value,
    pub metadata: serde_json::Value,
    pub actor_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
}

impl DomainEvent {
    /// Persist a new event, unprocessed.
    ///
    /// Fails with a unique-constraint violation if the id already exists;
    /// callers translate that into a duplicate-event error.
    pub async fn create(pool: &PgPool, data: CreateDomainEvent) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO domain_events (
                id, event_type, aggregate_type, aggregate_id, aggregate_version,
                payload, metadata, actor_id, tenant_id, correlation_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            ",
        )
        .bind(data.id)
        .bind(&data.event_type)
        .bind(&data.aggregate_type)
        .bind(data.aggregate_id)
        .bind(data.aggregate_version)
        .bind(&data.payload)
        .bind(&data.metadata)
        .bind(data.actor_id)
        .bind(data.tenant_id)
        .bind(data.correlation_id)
        .fetch_one(pool)
        .await
    }

    /// Fetch one event by id.
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(r"SELECT * FROM domain_events WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Fetch all events for one aggregate, in version order.
    pub async fn find_by_aggregate(
        pool: &PgPool,
        aggregate_type: &str,
        aggregate_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM domain_events
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ORDER BY aggregate_version, occurred_at
            ",
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .fetch_all(pool)
        .await
    }

    /// Fetch all events sharing a correlation id, in occurrence order.
    pub async fn find_by_correlation(
        pool: &PgPool,
        correlation_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM domain_events
            WHERE correlation_id = $1
            ORDER BY occurred_at
            ",
        )
        .bind(correlation_id)
        .fetch_all(pool)
        .await
    }

    /// Read-only scan of unprocessed, unclaimed events.
    pub async fn find_unprocessed(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM domain_events
            WHERE processed = FALSE AND claimed_at IS NULL
            ORDER BY occurred_at
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Claim a batch of unprocessed events for exclusive processing.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` inside a single statement so concurrent
    /// workers never receive the same row. Claims from crashed workers become
    /// claimable again once older than `stale_after_secs`, preserving
    /// at-least-once dispatch.
    pub async fn claim_unprocessed(
        pool: &PgPool,
        worker: &str,
        limit: i64,
        stale_after_secs: f64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE domain_events
            SET claimed_at = NOW(), claimed_by = $1
            WHERE id IN (
                SELECT id FROM domain_events
                WHERE processed = FALSE
                  AND (claimed_at IS NULL OR claimed_at < NOW() - make_interval(secs => $3))
                ORDER BY occurred_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            ",
        )
        .bind(worker)
        .bind(limit)
        .bind(stale_after_secs)
        .fetch_all(pool)
        .await
    }

    /// Mark one event processed. Returns false if it was already processed.
    pub async fn mark_processed(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE domain_events
            SET processed = TRUE, processed_at = NOW()
            WHERE id = $1 AND processed = FALSE
            ",
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark a batch of events processed in one statement.
    pub async fn mark_processed_bulk(pool: &PgPool, ids: &[Uuid]) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r"
            UPDATE domain_events
            SET processed = TRUE, processed_at = NOW()
            WHERE id = ANY($1) AND processed = FALSE
            ",
        )
        .bind(ids)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Release claims held longer than `stale_after_secs`.
    ///
    /// Crash recovery: events claimed by a worker that never marked them
    /// processed return to the claimable pool.
    pub async fn release_stale_claims(
        pool: &PgPool,
        stale_after_secs: f64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE domain_events
            SET claimed_at = NULL, claimed_by = NULL
            WHERE processed = FALSE
              AND claimed_at IS NOT NULL
              AND claimed_at < NOW() - make_interval(secs => $1)
            ",
        )
        .bind(stale_after_secs)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Replace event metadata. The only payload-adjacent field that may
    /// change after insert.
    pub async fn update_metadata(
        pool: &PgPool,
        id: Uuid,
        metadata: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(r"UPDATE domain_events SET metadata = $2 WHERE id = $1")
            .bind(id)
            .bind(metadata)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count of unprocessed events, for monitoring.
    pub async fn count_unprocessed(pool: &PgPool) -> Result<i64, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as(r"SELECT COUNT(*) FROM domain_events WHERE processed = FALSE")
                .fetch_one(pool)
                .await?;

        Ok(row.0)
    }
}
