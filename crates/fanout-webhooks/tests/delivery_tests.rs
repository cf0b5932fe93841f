//! End-to-end delivery tests against a mock HTTP receiver.
//!
//! Requires PostgreSQL (`DATABASE_URL`) and the `integration` feature.

#![cfg(feature = "integration")]

mod common;

use common::*;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use fanout_db::models::{
    CreateWebhookSubscription, DeliveryStatus, WebhookDelivery, WebhookSubscription,
};
use fanout_webhooks::crypto::verify_signature;
use fanout_webhooks::{DeliveryService, SubscriptionIndex};

async fn subscribe(
    pool: &sqlx::PgPool,
    tenant_id: Uuid,
    endpoint_id: Uuid,
    pattern: &str,
) -> WebhookSubscription {
    WebhookSubscription::create(
        pool,
        CreateWebhookSubscription {
            tenant_id,
            endpoint_id,
            event_type_pattern: pattern.to_string(),
            filters: serde_json::json!([]),
        },
    )
    .await
    .expect("subscription create failed")
}

#[tokio::test]
async fn successful_delivery_records_attempt_and_signs_payload() {
    let pool = pool().await;
    let tenant = Uuid::new_v4();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let endpoint = make_endpoint(&pool, tenant, &server.uri()).await;
    subscribe(&pool, tenant, endpoint.id, "user.*").await;

    let event = make_event(&pool, tenant, "user.created", serde_json::json!({"plan": "pro"})).await;

    let index = SubscriptionIndex::new(pool.clone());
    let matches = index
        .get_matching_subscriptions("user.created", Some(tenant), &event.payload)
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);

    let service = DeliveryService::new(pool.clone(), TEST_KEY.to_vec()).unwrap();
    service.deliver_event(&event, &matches).await;

    // Delivery row reached success with one recorded attempt.
    let deliveries = WebhookDelivery::list_by_event(&pool, event.id).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].status, DeliveryStatus::Success);
    assert_eq!(deliveries[0].attempt_count, 1);

    let attempts = WebhookDelivery::list_attempts(&pool, deliveries[0].id)
        .await
        .unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].response_status, Some(200));

    // The received request is signed over its raw body and carries the
    // system headers.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    let signature = request
        .headers
        .get("X-Fanout-Signature")
        .expect("signature header missing")
        .to_str()
        .unwrap();
    assert!(verify_signature(signature, TEST_SECRET, &request.body));

    assert_eq!(
        request.headers.get("X-Static").unwrap().to_str().unwrap(),
        "fixture"
    );

    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["event_type"], "user.created");
    assert_eq!(body["data"]["plan"], "pro");
    assert_eq!(body["event_id"], serde_json::json!(event.id));
}

#[tokio::test]
async fn delivery_created_pending_before_event_is_processed() {
    let pool = pool().await;
    let tenant = Uuid::new_v4();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let endpoint = make_endpoint(&pool, tenant, &server.uri()).await;
    subscribe(&pool, tenant, endpoint.id, "user.created").await;

    let event = make_event(&pool, tenant, "user.created", serde_json::json!({})).await;
    assert!(!event.processed);

    let index = SubscriptionIndex::new(pool.clone());
    let matches = index
        .get_matching_subscriptions("user.created", Some(tenant), &event.payload)
        .await
        .unwrap();

    let service = DeliveryService::new(pool.clone(), TEST_KEY.to_vec()).unwrap();
    service.deliver_event(&event, &matches).await;

    // The delivery exists while the event is still unprocessed: marking
    // processed is the caller's final step.
    let deliveries = WebhookDelivery::list_by_event(&pool, event.id).await.unwrap();
    assert_eq!(deliveries.len(), 1);

    let fresh = fanout_db::models::DomainEvent::find_by_id(&pool, event.id)
        .await
        .unwrap()
        .unwrap();
    assert!(!fresh.processed);
}

#[tokio::test]
async fn failed_delivery_schedules_exponential_retry() {
    let pool = pool().await;
    let tenant = Uuid::new_v4();

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let endpoint = make_endpoint(&pool, tenant, &server.uri()).await;
    subscribe(&pool, tenant, endpoint.id, "user.*").await;

    let event = make_event(&pool, tenant, "user.deleted", serde_json::json!({})).await;

    let index = SubscriptionIndex::new(pool.clone());
    let matches = index
        .get_matching_subscriptions("user.deleted", Some(tenant), &event.payload)
        .await
        .unwrap();

    let service = DeliveryService::new(pool.clone(), TEST_KEY.to_vec()).unwrap();
    service.deliver_event(&event, &matches).await;

    let deliveries = WebhookDelivery::list_by_event(&pool, event.id).await.unwrap();
    assert_eq!(deliveries.len(), 1);
    let delivery = &deliveries[0];

    assert_eq!(delivery.status, DeliveryStatus::PendingRetry);
    assert_eq!(delivery.attempt_count, 1);
    assert_eq!(delivery.last_error.as_deref(), Some("HTTP 500"));

    // base_backoff=2, multiplier=2.0, first failure: ~2s out.
    let next = delivery.next_retry_at.expect("retry must be scheduled");
    let delay = (next - chrono::Utc::now()).num_seconds();
    assert!((0..=3).contains(&delay), "expected ~2s delay, got {delay}");
}

#[tokio::test]
async fn unverified_endpoint_excluded_for_verification_required_type() {
    let pool = pool().await;
    let tenant = Uuid::new_v4();

    fanout_db::models::WebhookEventType::upsert(
        &pool,
        fanout_db::models::CreateWebhookEventType {
            event_type: "billing.charged".to_string(),
            description: None,
            payload_schema: None,
            requires_verification: true,
        },
    )
    .await
    .unwrap();

    let endpoint = make_endpoint(&pool, tenant, "https://hooks.example.com/sink").await;
    assert!(!endpoint.verified);
    subscribe(&pool, tenant, endpoint.id, "billing.charged").await;

    let index = SubscriptionIndex::new(pool.clone());
    let matches = index
        .get_matching_subscriptions("billing.charged", Some(tenant), &serde_json::json!({}))
        .await
        .unwrap();
    assert!(matches.is_empty(), "unverified endpoint must not match");

    // Verification flips the gate.
    fanout_db::models::WebhookEndpoint::mark_verified(&pool, tenant, endpoint.id)
        .await
        .unwrap();
    let matches = index
        .get_matching_subscriptions("billing.charged", Some(tenant), &serde_json::json!({}))
        .await
        .unwrap();
    assert_eq!(matches.len(), 1);
}

#[tokio::test]
async fn subscription_filters_narrow_matches() {
    let pool = pool().await;
    let tenant = Uuid::new_v4();

    let endpoint = make_endpoint(&pool, tenant, "https://hooks.example.com/filtered").await;
    WebhookSubscription::create(
        &pool,
        CreateWebhookSubscription {
            tenant_id: tenant,
            endpoint_id: endpoint.id,
            event_type_pattern: "subscription.changed".to_string(),
            filters: serde_json::json!([
                {"field": "data.plan", "operator": "in", "value": ["pro", "enterprise"]}
            ]),
        },
    )
    .await
    .unwrap();

    let index = SubscriptionIndex::new(pool.clone());

    let pro = index
        .get_matching_subscriptions(
            "subscription.changed",
            Some(tenant),
            &serde_json::json!({"data": {"plan": "pro"}}),
        )
        .await
        .unwrap();
    assert_eq!(pro.len(), 1);

    let free = index
        .get_matching_subscriptions(
            "subscription.changed",
            Some(tenant),
            &serde_json::json!({"data": {"plan": "free"}}),
        )
        .await
        .unwrap();
    assert!(free.is_empty());
}
