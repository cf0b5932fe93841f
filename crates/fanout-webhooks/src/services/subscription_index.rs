//! Subscription index: event-to-subscription matching.
//!
//! The candidate set is fetched with an index-friendly query (the pattern
//! can only be the exact type, the category wildcard, or `*`, so matching
//! is pushed into an `IN` clause over pruned columns). Filter predicates
//! and verification gating are applied in-process.

use sqlx::PgPool;
use uuid::Uuid;

use fanout_core::condition::{evaluate_all, Condition};
use fanout_core::pattern::wildcard_for;
use fanout_db::models::{SubscriptionMatch, WebhookEventType, WebhookSubscription};

use crate::error::WebhookError;

/// Matching service over webhook subscriptions.
#[derive(Clone)]
pub struct SubscriptionIndex {
    pool: PgPool,
}

impl SubscriptionIndex {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Active subscriptions matching an event.
    ///
    /// A subscription matches when its pattern covers the event type, every
    /// filter condition holds on the payload, and — for event types that
    /// require verification — the endpoint is verified. A `None` context
    /// matches subscriptions of every tenant (system-wide events).
    pub async fn get_matching_subscriptions(
        &self,
        event_type: &str,
        context_id: Option<Uuid>,
        payload: &serde_json::Value,
    ) -> Result<Vec<SubscriptionMatch>, WebhookError> {
        let wildcard = wildcard_for(event_type).unwrap_or_else(|| "*".to_string());

        let candidates =
            WebhookSubscription::find_candidates(&self.pool, event_type, &wildcard, context_id)
                .await?;

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let requires_verification =
            WebhookEventType::requires_verification(&self.pool, event_type).await?;

        let matched: Vec<SubscriptionMatch> = candidates
            .into_iter()
            .filter(|sub| {
                if requires_verification && !sub.endpoint_verified {
                    tracing::debug!(
                        target: "webhook_delivery",
                        subscription_id = %sub.id,
                        endpoint_id = %sub.endpoint_id,
                        event_type,
                        "Skipping unverified endpoint for verification-required event type"
                    );
                    return false;
                }
                filters_match(&sub.filters, payload)
            })
            .collect();

        Ok(matched)
    }
}

/// Evaluate a subscription's stored filter document against a payload.
///
/// Filters are a JSON array of conditions. An empty or missing array
/// matches everything; an unparseable document matches nothing (and is
/// logged), so a corrupted filter cannot broadcast events it was meant to
/// narrow.
fn filters_match(filters: &serde_json::Value, payload: &serde_json::Value) -> bool {
    if filters.is_null() {
        return true;
    }

    match serde_json::from_value::<Vec<Condition>>(filters.clone()) {
        Ok(conditions) => evaluate_all(&conditions, payload),
        Err(e) => {
            tracing::warn!(
                target: "webhook_delivery",
                error = %e,
                "Unparseable subscription filter; treating as non-matching"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_filters_match() {
        assert!(filters_match(&json!([]), &json!({"data": {"plan": "pro"}})));
        assert!(filters_match(&serde_json::Value::Null, &json!({})));
    }

    #[test]
    fn test_filters_apply_conditions() {
        let filters = json!([
            {"field": "data.plan", "operator": "in", "value": ["pro", "enterprise"]}
        ]);
        assert!(filters_match(&filters, &json!({"data": {"plan": "pro"}})));
        assert!(!filters_match(&filters, &json!({"data": {"plan": "free"}})));
    }

    #[test]
    fn test_unparseable_filters_match_nothing() {
        let filters = json!({"not": "an array"});
        assert!(!filters_match(&filters, &json!({})));
    }
}
