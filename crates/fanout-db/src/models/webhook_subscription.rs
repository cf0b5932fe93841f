//! `WebhookSubscription` model: binds one endpoint to one event type
//! pattern with an optional payload filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// A subscription of one endpoint to one event type pattern.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub endpoint_id: Uuid,
    /// Exact type, `category.*` wildcard, or `*`.
    pub event_type_pattern: String,
    /// JSON array of filter conditions evaluated against the event payload.
    pub filters: serde_json::Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data needed to create a subscription.
#[derive(Debug, Clone)]
pub struct CreateWebhookSubscription {
    pub tenant_id: Uuid,
    pub endpoint_id: Uuid,
    pub event_type_pattern: String,
    pub filters: serde_json::Value,
}

/// Pruned projection used on the matching hot path.
///
/// Only the columns needed to decide and route a delivery are selected;
/// the endpoint's verified flag rides along for verification gating.
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionMatch {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub endpoint_id: Uuid,
    pub filters: serde_json::Value,
    pub endpoint_verified: bool,
}

impl WebhookSubscription {
    /// Create a new subscription, active by default.
    pub async fn create(
        pool: &PgPool,
        data: CreateWebhookSubscription,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO webhook_subscriptions (
                tenant_id, endpoint_id, event_type_pattern, filters
            )
            VALUES ($1, $2, $3, $4)
            RETURNING *
            ",
        )
        .bind(data.tenant_id)
        .bind(data.endpoint_id)
        .bind(&data.event_type_pattern)
        .bind(&data.filters)
        .fetch_one(pool)
        .await
    }

    /// Fetch one subscription scoped to its tenant.
    pub async fn find_by_id(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(r"SELECT * FROM webhook_subscriptions WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(pool)
            .await
    }

    /// List all subscriptions attached to one endpoint.
    pub async fn list_by_endpoint(
        pool: &PgPool,
        tenant_id: Uuid,
        endpoint_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT * FROM webhook_subscriptions
            WHERE tenant_id = $1 AND endpoint_id = $2
            ORDER BY created_at
            ",
        )
        .bind(tenant_id)
        .bind(endpoint_id)
        .fetch_all(pool)
        .await
    }

    /// Candidate subscriptions for an event, index-friendly.
    ///
    /// Pattern matching is pushed into the query: a subscription can only
    /// match via its exact type, its category wildcard, or `*`, so the
    /// candidate set is `event_type_pattern IN ($2, $3, '*')`. Joins the
    /// endpoint to restrict to active targets and to carry the verified
    /// flag. A `None` context matches subscriptions of every tenant
    /// (system-wide events).
    pub async fn find_candidates(
        pool: &PgPool,
        event_type: &str,
        category_wildcard: &str,
        context_id: Option<Uuid>,
    ) -> Result<Vec<SubscriptionMatch>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT s.id, s.tenant_id, s.endpoint_id, s.filters,
                   e.verified AS endpoint_verified
            FROM webhook_subscriptions s
            JOIN webhook_endpoints e ON e.id = s.endpoint_id AND e.active = TRUE
            WHERE s.active = TRUE
              AND s.event_type_pattern IN ($1, $2, '*')
              AND ($3::uuid IS NULL OR s.tenant_id = $3)
            ",
        )
        .bind(event_type)
        .bind(category_wildcard)
        .bind(context_id)
        .fetch_all(pool)
        .await
    }

    /// Deactivate one subscription. Returns false if not found.
    pub async fn deactivate(
        pool: &PgPool,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_subscriptions
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

    /// Deactivate every subscription attached to an endpoint, returning the
    /// count. Used when an endpoint is deactivated.
    pub async fn deactivate_for_endpoint(
        pool: &PgPool,
        endpoint_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            UPDATE webhook_subscriptions
            SET active = FALSE, updated_at = NOW()
            WHERE endpoint_id = $1 AND active = TRUE
            ",
        )
        .bind(endpoint_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}
