//! `WebhookDelivery` model: one delivery obligation for one
//! (event, endpoint) pair, with its append-only attempt history.
//!
//! The status field is a finite state machine:
//!
//! ```text
//! pending -> success
//! pending -> failed -> pending_retry -> pending -> ...
//! failed (attempts exhausted) -> exhausted
//! any non-terminal -> cancelled
//! ```
//!
//! Retries are data, not code: `next_retry_at` is polled by the dispatch
//! runner and due rows are claimed with `FOR UPDATE SKIP LOCKED`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Delivery state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Awaiting an attempt.
    Pending,
    /// A 2xx response was received.
    Success,
    /// The last attempt failed; retry scheduling not yet decided.
    Failed,
    /// Waiting for `next_retry_at`.
    PendingRetry,
    /// All attempts consumed without success. Terminal.
    Exhausted,
    /// Cancelled by an operator or endpoint deactivation. Terminal.
    Cancelled,
}

impl DeliveryStatus {
    /// Terminal states permit no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Success | DeliveryStatus::Exhausted | DeliveryStatus::Cancelled
        )
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Success => write!(f, "success"),
            DeliveryStatus::Failed => write!(f, "failed"),
            DeliveryStatus::PendingRetry => write!(f, "pending_retry"),
            DeliveryStatus::Exhausted => write!(f, "exhausted"),
            DeliveryStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "success" => Ok(DeliveryStatus::Success),
            "failed" => Ok(DeliveryStatus::Failed),
            "pending_retry" => Ok(DeliveryStatus::PendingRetry),
            "exhausted" => Ok(DeliveryStatus::Exhausted),
            "cancelled" => Ok(DeliveryStatus::Cancelled),
            _ => Err(format!("Unknown delivery status: {s}")),
        }
    }
}

/// One delivery obligation for one (event, endpoint) pair.
///
/// Backoff parameters are copied from the endpoint at creation time so a
/// later endpoint reconfiguration does not change in-flight schedules.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub endpoint_id: Uuid,
    pub event_id: Uuid,
    pub status: DeliveryStatus,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub base_backoff_secs: i32,
    pub backoff_multiplier: f64,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data needed to create a delivery.
#[derive(Debug, Clone)]
pub struct CreateWebhookDelivery {
    pub tenant_id: Uuid,
    pub endpoint_id: Uuid,
    pub event_id: Uuid,
    pub max_attempts: i32,
    pub base_backoff_secs: i32,
    pub backoff_multiplier: f64,
}

/// One HTTP call made in pursuit of a delivery. Append-only.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookDeliveryAttempt {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub attempt_number: i32,
    pub request_url: String,
    pub request_headers: serde_json::Value,
    pub response_status: Option<i16>,
    pub response_body: Option<String>,
    pub duration_ms: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Data recorded for one attempt.
#[derive(Debug, Clone)]
pub struct CreateDeliveryAttempt {
    pub delivery_id: Uuid,
    pub attempt_number: i32,
    pub request_url: String,
    pub request_headers: serde_json::Value,
    pub response_status: Option<i16>,
    pub response_body: Option<String>,
    pub duration_ms: i32,
    pub error: Option<String>,
}

impl WebhookDelivery {
    /// Create a delivery in `pending` state.
    pub async fn create(pool: &PgPool, data: CreateWebhookDelivery) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO webhook_deliveries (
                tenant_id, endpoint_id, event_id, max_attempts,
                base_backoff_secs, backoff_multiplier
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            ",
        )
        .bind(data.tenant_id)
        .bind(data.endpoint_id)
        .bind(data.event_id)
        .bind(data.max_attempts)
        .bind(data.base_backoff_secs)
        .bind(data.backoff_multiplier)
        .fetch_one(pool)
        .await
    }

    /// Fetch one delivery scoped to its tenant.
    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(r"SELECT * FROM webhook_deliveries WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(pool)
            .await
    }

    /// Record one attempt: appends the attempt row and bumps the delivery's
    /// attempt counter in one transaction.
    pub async fn record_attempt(
        pool: &PgPool,
        data: CreateDeliveryAttempt,
    ) -> Result<WebhookDeliveryAttempt, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let attempt: WebhookDeliveryAttempt = sqlx::query_as(
            r"
            INSERT INTO webhook_delivery_attempts (
                delivery_id, attempt_number, request_url, request_headers,
                response_status, response_body, duration_ms, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            ",
        )
        .bind(data.delivery_id)
        .bind(data.attempt_number)
        .bind(&data.request_url)
        .bind(&data.request_headers)
        .bind(data.response_status)
        .bind(&data.response_body)
        .bind(data.duration_ms)
        .bind(&data.error)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET attempt_count = $2, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(data.delivery_id)
        .bind(data.attempt_number)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(attempt)
    }

    /// Transition to `success`.
    pub async fn mark_success(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'success', next_retry_at = NULL, last_error = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('success', 'exhausted', 'cancelled')
            ",
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Transition to `pending_retry` with the next attempt time.
    pub async fn schedule_retry(
        pool: &PgPool,
        id: Uuid,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'pending_retry', next_retry_at = $2, last_error = $3,
                updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('success', 'exhausted', 'cancelled')
            ",
        )
        .bind(id)
        .bind(next_retry_at)
        .bind(error)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Transition to terminal `exhausted` after the final failed attempt.
    pub async fn mark_exhausted(pool: &PgPool, id: Uuid, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'exhausted', next_retry_at = NULL, last_error = $2,
                updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('success', 'exhausted', 'cancelled')
            ",
        )
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Cancel a delivery from any non-terminal state.
    pub async fn cancel(pool: &PgPool, id: Uuid, reason: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'cancelled', next_retry_at = NULL, last_error = $2,
                updated_at = NOW()
            WHERE id = $1 AND status NOT IN ('success', 'exhausted', 'cancelled')
            ",
        )
        .bind(id)
        .bind(reason)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Cancel every non-terminal delivery for an endpoint, returning the
    /// count. Used when an endpoint is deactivated.
    pub async fn cancel_for_endpoint(
        pool: &PgPool,
        endpoint_id: Uuid,
        reason: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_deliveries
            SET status = 'cancelled', next_retry_at = NULL, last_error = $2,
                updated_at = NOW()
            WHERE endpoint_id = $1
              AND status NOT IN ('success', 'exhausted', 'cancelled')
            ",
        )
        .bind(endpoint_id)
        .bind(reason)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Claim deliveries whose retry is due, moving them back to `pending`.
    ///
    /// `FOR UPDATE SKIP LOCKED` keeps concurrent runners from double-claiming
    /// the same delivery.
    pub async fn claim_due_retries(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE webhook_deliveries
            SET status = 'pending', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE status = 'pending_retry' AND next_retry_at <= NOW()
                ORDER BY next_retry_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            ",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Re-queue exhausted deliveries for another retry round (operator
    /// action). Attempt history is preserved; the max-attempts window
    /// restarts from the current count.
    pub async fn requeue_exhausted(pool: &PgPool, limit: i64) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE webhook_deliveries
            SET status = 'pending_retry', next_retry_at = NOW(),
                max_attempts = attempt_count + 1, updated_at = NOW()
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE status = 'exhausted'
                ORDER BY updated_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            ",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// All attempts for one delivery, oldest first.
    pub async fn list_attempts(
        pool: &PgPool,
        delivery_id: Uuid,
    ) -> Result<Vec<WebhookDeliveryAttempt>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_delivery_attempts
            WHERE delivery_id = $1
            ORDER BY attempt_number
            ",
        )
        .bind(delivery_id)
        .fetch_all(pool)
        .await
    }

    /// Deliveries created for one event, for dispatch bookkeeping.
    pub async fn list_by_event(pool: &PgPool, event_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(r"SELECT * FROM webhook_deliveries WHERE event_id = $1 ORDER BY created_at")
            .bind(event_id)
            .fetch_all(pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Success,
            DeliveryStatus::Failed,
            DeliveryStatus::PendingRetry,
            DeliveryStatus::Exhausted,
            DeliveryStatus::Cancelled,
        ] {
            let parsed: DeliveryStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_status_parse_invalid() {
        assert!("delivered".parse::<DeliveryStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(DeliveryStatus::Success.is_terminal());
        assert!(DeliveryStatus::Exhausted.is_terminal());
        assert!(DeliveryStatus::Cancelled.is_terminal());
        assert!(!DeliveryStatus::Pending.is_terminal());
        assert!(!DeliveryStatus::Failed.is_terminal());
        assert!(!DeliveryStatus::PendingRetry.is_terminal());
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&DeliveryStatus::PendingRetry).unwrap();
        assert_eq!(json, "\"pending_retry\"");
    }
}
