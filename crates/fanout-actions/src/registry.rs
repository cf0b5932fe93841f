//! Action registry: enabled actions cached in memory, keyed by event-type
//! pattern for O(matching-actions) lookup.
//!
//! The cache is time-boxed (default TTL 300s) and explicitly owned by the
//! registry instance: no ambient singleton. Callers that mutate actions
//! must call [`ActionRegistry::reload`] afterwards or accept serving stale
//! rules for up to the TTL window.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use fanout_core::condition::{evaluate_all, Condition};
use fanout_core::pattern::wildcard_for;
use fanout_db::models::EventAction;

use crate::error::ActionError;

/// Default cache TTL.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

struct CachedActions {
    loaded_at: Instant,
    by_pattern: HashMap<String, Vec<Arc<EventAction>>>,
}

/// Refreshable in-memory index of enabled actions.
#[derive(Clone)]
pub struct ActionRegistry {
    pool: PgPool,
    ttl: Duration,
    cache: Arc<RwLock<Option<CachedActions>>>,
}

impl ActionRegistry {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            ttl: DEFAULT_CACHE_TTL,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Override the cache TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Actions matching an event: pattern, every condition, and context
    /// filters must all hold. Results are ordered by priority, highest
    /// first.
    pub async fn get_actions_for_event(
        &self,
        event_type: &str,
        context_id: Option<Uuid>,
        payload: &serde_json::Value,
    ) -> Result<Vec<Arc<EventAction>>, ActionError> {
        self.refresh_if_stale().await?;

        let cache = self.cache.read().await;
        let Some(cached) = cache.as_ref() else {
            return Ok(Vec::new());
        };

        let wildcard = wildcard_for(event_type);
        let mut keys = vec![event_type, "*"];
        if let Some(ref w) = wildcard {
            keys.push(w);
        }

        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut matched: Vec<Arc<EventAction>> = Vec::new();

        for key in keys {
            let Some(actions) = cached.by_pattern.get(key) else {
                continue;
            };
            for action in actions {
                if !seen.insert(action.id) {
                    continue;
                }
                if action_applies(action, context_id, payload) {
                    matched.push(Arc::clone(action));
                }
            }
        }

        matched.sort_by(|a, b| b.priority.cmp(&a.priority));

        Ok(matched)
    }

    /// Force a cache refresh. Call after any action create/update/delete.
    pub async fn reload(&self) -> Result<usize, ActionError> {
        let actions = EventAction::list_active(&self.pool).await?;
        let count = actions.len();
        let by_pattern = build_pattern_map(actions);

        let mut cache = self.cache.write().await;
        *cache = Some(CachedActions {
            loaded_at: Instant::now(),
            by_pattern,
        });

        tracing::debug!(
            target: "action_registry",
            action_count = count,
            "Action cache reloaded"
        );

        Ok(count)
    }

    async fn refresh_if_stale(&self) -> Result<(), ActionError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.loaded_at.elapsed() < self.ttl {
                    return Ok(());
                }
            }
        }

        // Stale or empty; one loader wins, late arrivals see a fresh cache.
        let actions = EventAction::list_active(&self.pool).await?;
        let by_pattern = build_pattern_map(actions);

        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.as_ref() {
            if cached.loaded_at.elapsed() < self.ttl {
                return Ok(());
            }
        }
        *cache = Some(CachedActions {
            loaded_at: Instant::now(),
            by_pattern,
        });

        Ok(())
    }
}

/// Group actions by every pattern they listen to.
fn build_pattern_map(actions: Vec<EventAction>) -> HashMap<String, Vec<Arc<EventAction>>> {
    let mut by_pattern: HashMap<String, Vec<Arc<EventAction>>> = HashMap::new();

    for action in actions {
        let action = Arc::new(action);
        for pattern in &action.event_types {
            by_pattern
                .entry(pattern.clone())
                .or_default()
                .push(Arc::clone(&action));
        }
    }

    by_pattern
}

/// Non-pattern matching criteria: tenant scope, context filters, and
/// payload conditions, AND-ed.
fn action_applies(
    action: &EventAction,
    context_id: Option<Uuid>,
    payload: &serde_json::Value,
) -> bool {
    // Tenant-scoped actions only fire for events in their tenant.
    if let Some(tenant) = action.tenant_id {
        if context_id != Some(tenant) {
            return false;
        }
    }

    if !context_filters_satisfied(&action.context_filters, context_id) {
        return false;
    }

    match serde_json::from_value::<Vec<Condition>>(action.conditions.clone()) {
        Ok(conditions) => evaluate_all(&conditions, payload),
        Err(e) => {
            tracing::warn!(
                target: "action_registry",
                action_id = %action.id,
                error = %e,
                "Unparseable action conditions; treating as non-matching"
            );
            false
        }
    }
}

/// Context filter map: `{"context_ids": ["..."]}` restricts the action to
/// events whose context id is in the list. An empty or missing map matches
/// every context.
fn context_filters_satisfied(filters: &serde_json::Value, context_id: Option<Uuid>) -> bool {
    let Some(allowed) = filters.get("context_ids").and_then(|v| v.as_array()) else {
        return true;
    };

    if allowed.is_empty() {
        return true;
    }

    let Some(context) = context_id else {
        return false;
    };

    allowed
        .iter()
        .filter_map(|v| v.as_str())
        .filter_map(|s| Uuid::parse_str(s).ok())
        .any(|allowed_id| allowed_id == context)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fanout_db::models::{ActionStatus, ExecutionMode, HandlerType};
    use serde_json::json;

    fn test_action(event_types: Vec<&str>, conditions: serde_json::Value) -> EventAction {
        EventAction {
            id: Uuid::new_v4(),
            name: "test action".to_string(),
            handler_type: HandlerType::Webhook,
            configuration: json!({"url": "https://example.com"}),
            event_types: event_types.into_iter().map(String::from).collect(),
            conditions,
            context_filters: json!({}),
            execution_mode: ExecutionMode::Async,
            priority: 0,
            timeout_secs: 30,
            max_retries: 3,
            retry_delay_secs: 5,
            status: ActionStatus::Active,
            tenant_id: None,
            trigger_count: 0,
            success_count: 0,
            failure_count: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_build_pattern_map_groups_by_every_pattern() {
        let action = test_action(vec!["user.*", "organization.created"], json!([]));
        let id = action.id;

        let map = build_pattern_map(vec![action]);
        assert_eq!(map.get("user.*").unwrap()[0].id, id);
        assert_eq!(map.get("organization.created").unwrap()[0].id, id);
    }

    #[test]
    fn test_action_applies_with_empty_criteria() {
        let action = test_action(vec!["*"], json!([]));
        assert!(action_applies(&action, None, &json!({})));
        assert!(action_applies(&action, Some(Uuid::new_v4()), &json!({})));
    }

    #[test]
    fn test_action_conditions_gate_matching() {
        let action = test_action(
            vec!["*"],
            json!([{"field": "data.plan", "operator": "in", "value": ["pro", "enterprise"]}]),
        );
        assert!(action_applies(&action, None, &json!({"data": {"plan": "pro"}})));
        assert!(!action_applies(&action, None, &json!({"data": {"plan": "free"}})));
    }

    #[test]
    fn test_tenant_scoped_action() {
        let tenant = Uuid::new_v4();
        let mut action = test_action(vec!["*"], json!([]));
        action.tenant_id = Some(tenant);

        assert!(action_applies(&action, Some(tenant), &json!({})));
        assert!(!action_applies(&action, Some(Uuid::new_v4()), &json!({})));
        assert!(!action_applies(&action, None, &json!({})));
    }

    #[test]
    fn test_context_filters() {
        let allowed = Uuid::new_v4();
        assert!(context_filters_satisfied(&json!({}), None));
        assert!(context_filters_satisfied(&json!({"context_ids": []}), None));
        assert!(context_filters_satisfied(
            &json!({"context_ids": [allowed.to_string()]}),
            Some(allowed)
        ));
        assert!(!context_filters_satisfied(
            &json!({"context_ids": [allowed.to_string()]}),
            Some(Uuid::new_v4())
        ));
        assert!(!context_filters_satisfied(
            &json!({"context_ids": [allowed.to_string()]}),
            None
        ));
    }

    #[test]
    fn test_unparseable_conditions_do_not_match() {
        let action = test_action(vec!["*"], json!("not an array"));
        assert!(!action_applies(&action, None, &json!({})));
    }
}
