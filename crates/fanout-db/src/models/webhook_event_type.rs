//! `WebhookEventType` catalog model.
//!
//! Administrator-seeded, read-mostly descriptions of the event types
//! available for subscription.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Catalog entry for a subscribable event type.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct WebhookEventType {
    pub id: Uuid,
    /// The `category.action` event type name, unique.
    pub event_type: String,
    pub description: Option<String>,
    /// Optional JSON Schema describing the payload shape.
    pub payload_schema: Option<serde_json::Value>,
    /// When true, only verified endpoints may receive this event type.
    pub requires_verification: bool,
    pub created_at: DateTime<Utc>,
}

/// Data needed to seed a catalog entry.
#[derive(Debug, Clone)]
pub struct CreateWebhookEventType {
    pub event_type: String,
    pub description: Option<String>,
    pub payload_schema: Option<serde_json::Value>,
    pub requires_verification: bool,
}

impl WebhookEventType {
    /// Insert or refresh a catalog entry.
    pub async fn upsert(pool: &PgPool, data: CreateWebhookEventType) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r"
            INSERT INTO webhook_event_types (
                event_type, description, payload_schema, requires_verification
            )
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_type) DO UPDATE
            SET description = EXCLUDED.description,
                payload_schema = EXCLUDED.payload_schema,
                requires_verification = EXCLUDED.requires_verification
            RETURNING *
            ",
        )
        .bind(&data.event_type)
        .bind(&data.description)
        .bind(&data.payload_schema)
        .bind(data.requires_verification)
        .fetch_one(pool)
        .await
    }

    /// Fetch one catalog entry by event type name.
    pub async fn find_by_type(
        pool: &PgPool,
        event_type: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(r"SELECT * FROM webhook_event_types WHERE event_type = $1")
            .bind(event_type)
            .fetch_optional(pool)
            .await
    }

    /// List the whole catalog.
    pub async fn list(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(r"SELECT * FROM webhook_event_types ORDER BY event_type")
            .fetch_all(pool)
            .await
    }

    /// Whether delivery of this event type is restricted to verified
    /// endpoints. Unknown event types are unrestricted.
    pub async fn requires_verification(
        pool: &PgPool,
        event_type: &str,
    ) -> Result<bool, sqlx::Error> {
        let row: Option<(bool,)> = sqlx::query_as(
            r"SELECT requires_verification FROM webhook_event_types WHERE event_type = $1",
        )
        .bind(event_type)
        .fetch_optional(pool)
        .await?;

        Ok(row.is_some_and(|(required,)| required))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_event_type_shape() {
        let data = CreateWebhookEventType {
            event_type: "invoice.paid".to_string(),
            description: Some("An invoice was settled".to_string()),
            payload_schema: None,
            requires_verification: true,
        };

        assert!(data.requires_verification);
    }
}
