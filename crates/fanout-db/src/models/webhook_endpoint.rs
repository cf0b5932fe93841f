//! `WebhookEndpoint` model: an externally owned HTTP delivery target.
//!
//! Endpoints are deactivated rather than hard-deleted once they have
//! delivery history. The secret used for payload signing is stored
//! AES-GCM-encrypted; encryption itself lives in the webhooks crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A webhook delivery target.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    /// Absolute HTTP(S) URL, validated at creation time.
    pub url: String,
    pub http_method: String,
    /// AES-GCM-encrypted signing secret; `None` delivers unsigned.
    pub secret_encrypted: Option<String>,
    /// Header carrying the payload signature, e.g. `X-Fanout-Signature`.
    pub signature_header: String,
    /// Caller-supplied headers merged into every request.
    pub custom_headers: serde_json::Value,
    pub timeout_secs: i32,
    pub max_attempts: i32,
    pub base_backoff_secs: i32,
    pub backoff_multiplier: f64,
    pub active: bool,
    /// Unverified endpoints may not receive events from subscriptions whose
    /// event type requires verification.
    pub verified: bool,
    pub consecutive_failures: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data needed to create a new endpoint.
#[derive(Debug, Clone)]
pub struct CreateWebhookEndpoint {
    pub tenant_id: Uuid,
    pub name: String,
    pub url: String,
    pub http_method: String,
    pub secret_encrypted: Option<String>,
    pub signature_header: String,
    pub custom_headers: serde_json::Value,
    pub timeout_secs: i32,
    pub max_attempts: i32,
    pub base_backoff_secs: i32,
    pub backoff_multiplier: f64,
}

/// Partial update for an endpoint; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdateWebhookEndpoint {
    pub name: Option<String>,
    pub url: Option<String>,
    pub secret_encrypted: Option<String>,
    pub custom_headers: Option<serde_json::Value>,
    pub timeout_secs: Option<i32>,
    pub max_attempts: Option<i32>,
    pub base_backoff_secs: Option<i32>,
    pub backoff_multiplier: Option<f64>,
    pub active: Option<bool>,
}

impl WebhookEndpoint {
    /// Create a new endpoint. New endpoints start active and unverified.
    pub async fn create(pool: &PgPool, data: CreateWebhookEndpoint) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO webhook_endpoints (
                tenant_id, name, url, http_method, secret_encrypted,
                signature_header, custom_headers, timeout_secs, max_attempts,
                base_backoff_secs, backoff_multiplier
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            ",
        )
        .bind(data.tenant_id)
        .bind(&data.name)
        .bind(&data.url)
        .bind(&data.http_method)
        .bind(&data.secret_encrypted)
        .bind(&data.signature_header)
        .bind(&data.custom_headers)
        .bind(data.timeout_secs)
        .bind(data.max_attempts)
        .bind(data.base_backoff_secs)
        .bind(data.backoff_multiplier)
        .fetch_one(pool)
        .await
    }

    /// Fetch one endpoint scoped to its tenant.
    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(r"SELECT * FROM webhook_endpoints WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(pool)
            .await
    }

    /// List endpoints for a tenant.
    pub async fn list_by_tenant(
        pool: &PgPool,
        tenant_id: Uuid,
        active_only: bool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_endpoints
            WHERE tenant_id = $1 AND ($2 = FALSE OR active = TRUE)
            ORDER BY created_at
            ",
        )
        .bind(tenant_id)
        .bind(active_only)
        .fetch_all(pool)
        .await
    }

    /// Apply a partial update.
    pub async fn update(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        data: UpdateWebhookEndpoint,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            UPDATE webhook_endpoints
            SET name = COALESCE($3, name),
                url = COALESCE($4, url),
                secret_encrypted = COALESCE($5, secret_encrypted),
                custom_headers = COALESCE($6, custom_headers),
                timeout_secs = COALESCE($7, timeout_secs),
                max_attempts = COALESCE($8, max_attempts),
                base_backoff_secs = COALESCE($9, base_backoff_secs),
                backoff_multiplier = COALESCE($10, backoff_multiplier),
                active = COALESCE($11, active),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING *
            ",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(&data.name)
        .bind(&data.url)
        .bind(&data.secret_encrypted)
        .bind(&data.custom_headers)
        .bind(data.timeout_secs)
        .bind(data.max_attempts)
        .bind(data.base_backoff_secs)
        .bind(data.backoff_multiplier)
        .bind(data.active)
        .fetch_optional(pool)
        .await
    }

    /// Deactivate an endpoint. Returns false if not found.
    pub async fn deactivate(pool: &PgPool, tenant_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_endpoints
            SET active = FALSE, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark an endpoint verified after its ownership challenge succeeds.
    pub async fn mark_verified(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_endpoints
            SET verified = TRUE, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(id)
        .bind(tenant_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Rotate the signing secret.
    pub async fn rotate_secret(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
        secret_encrypted: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_endpoints
            SET secret_encrypted = $3, updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            ",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(secret_encrypted)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Increment the consecutive-failure counter, returning the new value.
    pub async fn increment_consecutive_failures(
        pool: &PgPool,
        id: Uuid,
    ) -> Result<i32, sqlx::Error> {
        let row: (i32,) = sqlx::query_as(
            r"
            UPDATE webhook_endpoints
            SET consecutive_failures = consecutive_failures + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING consecutive_failures
            ",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;

        Ok(row.0)
    }

    /// Reset the consecutive-failure counter after a successful delivery.
    pub async fn reset_consecutive_failures(pool: &PgPool, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            UPDATE webhook_endpoints
            SET consecutive_failures = 0, updated_at = NOW()
            WHERE id = $1 AND consecutive_failures <> 0
            ",
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(())
    }
}
