//! Shared fixtures for the integration suites.
//!
//! These tests need a running PostgreSQL instance; point `DATABASE_URL` at
//! a scratch database and run with `--features integration`.

use sqlx::PgPool;
use tokio::sync::OnceCell;
use uuid::Uuid;

use fanout_db::models::{CreateDomainEvent, CreateWebhookEndpoint, DomainEvent, WebhookEndpoint};
use fanout_webhooks::crypto;

/// 32-byte key used for secret encryption in tests.
pub const TEST_KEY: [u8; 32] = [0x42u8; 32];

/// Plaintext signing secret used by test endpoints.
pub const TEST_SECRET: &str = "whsec_test_secret_12345";

static POOL: OnceCell<PgPool> = OnceCell::const_new();

/// Connect (once per test binary) and apply migrations.
pub async fn pool() -> PgPool {
    POOL.get_or_init(|| async {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must point at a scratch database for integration tests");
        let pool = fanout_db::connect(&url, 5).await.expect("connect failed");
        fanout_db::run_migrations(&pool)
            .await
            .expect("migrations failed");
        pool
    })
    .await
    .clone()
}

/// Create an active endpoint targeting the given URL, with the standard
/// test secret and tight backoff parameters.
pub async fn make_endpoint(pool: &PgPool, tenant_id: Uuid, url: &str) -> WebhookEndpoint {
    let secret_encrypted = crypto::encrypt_secret(TEST_SECRET, &TEST_KEY).unwrap();

    WebhookEndpoint::create(
        pool,
        CreateWebhookEndpoint {
            tenant_id,
            name: "test endpoint".to_string(),
            url: url.to_string(),
            http_method: "POST".to_string(),
            secret_encrypted: Some(secret_encrypted),
            signature_header: "X-Fanout-Signature".to_string(),
            custom_headers: serde_json::json!({"X-Static": "fixture"}),
            timeout_secs: 5,
            max_attempts: 3,
            base_backoff_secs: 2,
            backoff_multiplier: 2.0,
        },
    )
    .await
    .expect("endpoint create failed")
}

/// Persist an unprocessed event for a tenant.
pub async fn make_event(
    pool: &PgPool,
    tenant_id: Uuid,
    event_type: &str,
    payload: serde_json::Value,
) -> DomainEvent {
    DomainEvent::create(
        pool,
        CreateDomainEvent {
            id: Uuid::now_v7(),
            event_type: event_type.to_string(),
            aggregate_type: "user".to_string(),
            aggregate_id: Uuid::new_v4(),
            aggregate_version: 1,
            payload,
            metadata: serde_json::json!({}),
            actor_id: None,
            tenant_id: Some(tenant_id),
            correlation_id: None,
        },
    )
    .await
    .expect("event create failed")
}
