//! Event dispatcher: the orchestrator facade.
//!
//! Publishes events into the append-only store, claims unprocessed events
//! with skip-locked semantics, resolves matching webhook subscriptions and
//! actions, and drives batch/streaming processing with bounded concurrency.
//!
//! Correctness relies on the store's claim primitive, not application-level
//! mutual exclusion: multiple dispatcher instances may run this loop
//! concurrently against the same database. At-least-once dispatch holds
//! because events are only marked processed after their matched work is
//! dispatched; a crash in between redelivers on the next claim.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::Semaphore;
use uuid::Uuid;

use fanout_actions::{ActionExecutor, ActionRegistry, HandlerRegistry};
use fanout_core::condition::Condition;
use fanout_core::error::CoreError;
use fanout_core::pattern::{validate_event_type, validate_pattern};
use fanout_db::error::is_unique_violation;
use fanout_db::models::{
    CreateDomainEvent, CreateWebhookSubscription, DomainEvent, WebhookEndpoint,
    WebhookSubscription,
};
use fanout_webhooks::{DeliveryOutcomeKind, DeliveryService, SubscriptionIndex};

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::monitoring::DispatchMetrics;

/// Input for publishing a new domain event.
#[derive(Debug, Clone)]
pub struct PublishEvent {
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub aggregate_version: i32,
    pub payload: serde_json::Value,
    pub metadata: Option<serde_json::Value>,
    pub actor_id: Option<Uuid>,
    pub context_id: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
}

/// Health snapshot served by the admin router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub database: bool,
    pub unprocessed_events: i64,
}

impl HealthStatus {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.database
    }
}

/// Facade over the event store, subscription index, delivery engine, and
/// action subsystem.
#[derive(Clone)]
pub struct EventDispatcher {
    pool: PgPool,
    subscriptions: SubscriptionIndex,
    deliveries: DeliveryService,
    registry: ActionRegistry,
    executor: ActionExecutor,
    metrics: DispatchMetrics,
    worker_id: String,
    claim_stale_secs: f64,
    default_batch_size: usize,
    concurrent_workers: usize,
    allow_http: bool,
    allow_internal_hosts: bool,
}

impl EventDispatcher {
    /// Wire up a dispatcher from configuration with the default handler
    /// registry.
    pub fn new(pool: PgPool, config: &DispatchConfig) -> Result<Self, DispatchError> {
        Self::with_handlers(pool, config, HandlerRegistry::with_defaults())
    }

    /// Wire up a dispatcher with a caller-supplied handler registry.
    pub fn with_handlers(
        pool: PgPool,
        config: &DispatchConfig,
        handlers: HandlerRegistry,
    ) -> Result<Self, DispatchError> {
        let metrics = DispatchMetrics::new();

        let deliveries = DeliveryService::new(pool.clone(), config.encryption_key.clone())?;

        let hook_metrics = metrics.clone();
        let executor = ActionExecutor::new(pool.clone(), handlers)
            .with_outcome_hook(move |action_id, success| {
                hook_metrics.record_action(action_id, success);
            });

        Ok(Self {
            subscriptions: SubscriptionIndex::new(pool.clone()),
            registry: ActionRegistry::new(pool.clone()),
            deliveries,
            executor,
            metrics,
            pool,
            worker_id: config.worker_id.clone(),
            claim_stale_secs: config.claim_stale_secs,
            default_batch_size: config.batch_size.max(1),
            concurrent_workers: config.concurrent_workers.max(1),
            allow_http: config.allow_http,
            allow_internal_hosts: config.allow_internal_hosts,
        })
    }

    /// Start the queued-action worker pool. Call once at startup.
    pub async fn start_queue_workers(&self, worker_count: usize) {
        self.executor.start_queue_workers(worker_count).await;
    }

    #[must_use]
    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn deliveries(&self) -> &DeliveryService {
        &self.deliveries
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // -----------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------

    /// Validate and persist a new event, unprocessed.
    pub async fn publish(&self, input: PublishEvent) -> Result<DomainEvent, DispatchError> {
        validate_event_type(&input.event_type)?;

        let data = CreateDomainEvent {
            id: Uuid::now_v7(),
            event_type: input.event_type,
            aggregate_type: input.aggregate_type,
            aggregate_id: input.aggregate_id,
            aggregate_version: input.aggregate_version,
            payload: input.payload,
            metadata: input.metadata.unwrap_or_else(|| serde_json::json!({})),
            actor_id: input.actor_id,
            tenant_id: input.context_id,
            correlation_id: input.correlation_id,
        };

        let event = DomainEvent::create(&self.pool, data).await.map_err(|e| {
            if is_unique_violation(&e) {
                DispatchError::DuplicateEvent
            } else {
                DispatchError::Database(e)
            }
        })?;

        tracing::debug!(
            target: "event_dispatch",
            event_id = %event.id,
            event_type = %event.event_type,
            "Event published"
        );

        Ok(event)
    }

    /// Convenience publish with defaults for the optional fields.
    pub async fn create_and_publish(
        &self,
        event_type: &str,
        aggregate_type: &str,
        aggregate_id: Uuid,
        payload: serde_json::Value,
        context_id: Option<Uuid>,
    ) -> Result<DomainEvent, DispatchError> {
        self.publish(PublishEvent {
            event_type: event_type.to_string(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            aggregate_version: 1,
            payload,
            metadata: None,
            actor_id: None,
            context_id,
            correlation_id: None,
        })
        .await
    }

    // -----------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------

    /// Resolve and dispatch one event's matched subscriptions and actions.
    ///
    /// Does not mark the event processed; callers do that after this
    /// returns so a crash in between redelivers.
    pub async fn dispatch_event(&self, event: &DomainEvent) -> Result<(), DispatchError> {
        let matches = self
            .subscriptions
            .get_matching_subscriptions(&event.event_type, event.tenant_id, &event.payload)
            .await?;

        let outcomes = self.deliveries.deliver_event(event, &matches).await;
        for (endpoint_id, outcome) in outcomes {
            match outcome {
                DeliveryOutcomeKind::Success => {
                    self.metrics.record_delivery(endpoint_id, true, false);
                }
                DeliveryOutcomeKind::Failed => {
                    self.metrics.record_delivery(endpoint_id, false, false);
                }
                DeliveryOutcomeKind::FastFailed => {
                    self.metrics.record_delivery(endpoint_id, false, true);
                }
                DeliveryOutcomeKind::Skipped => {}
            }
        }

        let actions = self
            .registry
            .get_actions_for_event(&event.event_type, event.tenant_id, &event.payload)
            .await?;

        for action in actions {
            self.executor
                .execute(&action, event.id, &event.payload)
                .await?;
        }

        self.metrics.record_dispatched(1);

        Ok(())
    }

    /// Simple sequential batch: claim, dispatch, mark processed one by one.
    pub async fn dispatch_unprocessed(&self, limit: i64) -> Result<usize, DispatchError> {
        let events = DomainEvent::claim_unprocessed(
            &self.pool,
            &self.worker_id,
            limit,
            self.claim_stale_secs,
        )
        .await?;

        self.metrics.record_claimed(events.len());

        let mut processed = 0;
        for event in events {
            self.dispatch_event(&event).await?;
            DomainEvent::mark_processed(&self.pool, event.id).await?;
            processed += 1;
        }

        Ok(processed)
    }

    /// Optimized batch processing: claim up to `limit` events with
    /// skip-locked semantics, split into batches of `batch_size`, process
    /// batches with bounded concurrency, fan out per-event work across a
    /// bounded worker pool, and bulk-mark processed events per batch.
    pub async fn dispatch_unprocessed_optimized(
        &self,
        limit: i64,
        batch_size: usize,
        max_concurrent_batches: usize,
        concurrent_workers: usize,
    ) -> Result<usize, DispatchError> {
        let events = DomainEvent::claim_unprocessed(
            &self.pool,
            &self.worker_id,
            limit,
            self.claim_stale_secs,
        )
        .await?;

        if events.is_empty() {
            return Ok(0);
        }

        self.metrics.record_claimed(events.len());

        tracing::info!(
            target: "event_dispatch",
            claimed = events.len(),
            batch_size,
            max_concurrent_batches,
            concurrent_workers,
            worker_id = %self.worker_id,
            "Processing claimed events"
        );

        let batch_permits = Arc::new(Semaphore::new(max_concurrent_batches.max(1)));
        // One worker pool shared across batches caps total outbound calls.
        let worker_permits = Arc::new(Semaphore::new(concurrent_workers.max(1)));

        let mut handles = Vec::new();
        for chunk in events.chunks(batch_size.max(1)) {
            let batch: Vec<DomainEvent> = chunk.to_vec();
            let dispatcher = self.clone();
            let batch_permits = Arc::clone(&batch_permits);
            let worker_permits = Arc::clone(&worker_permits);

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = batch_permits.acquire_owned().await else {
                    return 0;
                };
                dispatcher.process_batch(batch, worker_permits).await
            }));
        }

        let mut processed = 0;
        for handle in handles {
            match handle.await {
                Ok(count) => processed += count,
                Err(e) => {
                    tracing::error!(
                        target: "event_dispatch",
                        error = %e,
                        "Batch task failed"
                    );
                }
            }
        }

        Ok(processed)
    }

    /// Streaming dispatch for unbounded backlogs with adaptive batch
    /// sizing: the batch shrinks when the observed in-flight payload volume
    /// exceeds `memory_threshold_bytes` and grows back under light
    /// pressure. Stops at `size_limit` processed events or an empty claim.
    pub async fn dispatch_streaming(
        &self,
        size_limit: usize,
        memory_threshold_bytes: usize,
    ) -> Result<usize, DispatchError> {
        let worker_permits = Arc::new(Semaphore::new(self.concurrent_workers));
        let mut batch_size = self.default_batch_size;
        let mut total = 0usize;

        while total < size_limit {
            let claim = batch_size.min(size_limit - total).max(1) as i64;
            let events = DomainEvent::claim_unprocessed(
                &self.pool,
                &self.worker_id,
                claim,
                self.claim_stale_secs,
            )
            .await?;

            if events.is_empty() {
                break;
            }

            self.metrics.record_claimed(events.len());

            let batch_bytes: usize = events.iter().map(estimate_event_bytes).sum();
            let processed = self
                .process_batch(events, Arc::clone(&worker_permits))
                .await;
            total += processed;

            if batch_bytes > memory_threshold_bytes {
                let shrunk = (batch_size / 2).max(1);
                tracing::debug!(
                    target: "event_dispatch",
                    batch_bytes,
                    memory_threshold_bytes,
                    from = batch_size,
                    to = shrunk,
                    "Memory pressure; shrinking streaming batch"
                );
                batch_size = shrunk;
            } else if batch_bytes < memory_threshold_bytes / 2
                && batch_size < self.default_batch_size
            {
                batch_size = (batch_size * 2).min(self.default_batch_size);
            }

            if processed == 0 {
                // Claimed but nothing marked processed: the store is
                // misbehaving, let the caller back off instead of spinning.
                break;
            }
        }

        Ok(total)
    }

    /// Dispatch each event of a batch on the shared worker pool and
    /// bulk-mark the successfully dispatched ones processed.
    async fn process_batch(
        &self,
        batch: Vec<DomainEvent>,
        worker_permits: Arc<Semaphore>,
    ) -> usize {
        let mut tasks = Vec::with_capacity(batch.len());

        for event in batch {
            let Ok(permit) = Arc::clone(&worker_permits).acquire_owned().await else {
                break;
            };
            let dispatcher = self.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                let event_id = event.id;
                match dispatcher.dispatch_event(&event).await {
                    Ok(()) => Some(event_id),
                    Err(e) => {
                        tracing::error!(
                            target: "event_dispatch",
                            event_id = %event_id,
                            error = %e,
                            "Event dispatch failed; leaving unprocessed for redelivery"
                        );
                        None
                    }
                }
            }));
        }

        let mut dispatched_ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            if let Ok(Some(id)) = task.await {
                dispatched_ids.push(id);
            }
        }

        match DomainEvent::mark_processed_bulk(&self.pool, &dispatched_ids).await {
            Ok(_) => dispatched_ids.len(),
            Err(e) => {
                tracing::error!(
                    target: "event_dispatch",
                    error = %e,
                    "Failed to bulk-mark events processed"
                );
                0
            }
        }
    }

    // -----------------------------------------------------------------
    // Subscriptions and deliveries
    // -----------------------------------------------------------------

    /// Subscribe an endpoint to an event type pattern with optional payload
    /// filters.
    pub async fn subscribe_endpoint(
        &self,
        tenant_id: Uuid,
        endpoint_id: Uuid,
        event_type_pattern: &str,
        filters: serde_json::Value,
    ) -> Result<WebhookSubscription, DispatchError> {
        validate_pattern(event_type_pattern)?;

        if !filters.is_null() {
            serde_json::from_value::<Vec<Condition>>(filters.clone()).map_err(|e| {
                DispatchError::Validation(CoreError::InvalidCondition {
                    reason: e.to_string(),
                })
            })?;
        }

        let endpoint = WebhookEndpoint::find_by_id(&self.pool, tenant_id, endpoint_id)
            .await?
            .ok_or(DispatchError::EndpointNotFound)?;

        if !endpoint.active {
            return Err(DispatchError::EndpointNotFound);
        }

        let subscription = WebhookSubscription::create(
            &self.pool,
            CreateWebhookSubscription {
                tenant_id,
                endpoint_id,
                event_type_pattern: event_type_pattern.to_string(),
                filters: if filters.is_null() {
                    serde_json::json!([])
                } else {
                    filters
                },
            },
        )
        .await?;

        tracing::info!(
            target: "event_dispatch",
            subscription_id = %subscription.id,
            endpoint_id = %endpoint_id,
            pattern = event_type_pattern,
            "Endpoint subscribed"
        );

        Ok(subscription)
    }

    /// Deactivate a subscription.
    pub async fn unsubscribe_endpoint(
        &self,
        tenant_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<(), DispatchError> {
        let removed =
            WebhookSubscription::deactivate(&self.pool, tenant_id, subscription_id).await?;
        if !removed {
            return Err(DispatchError::SubscriptionNotFound);
        }
        Ok(())
    }

    /// Re-queue exhausted deliveries and process everything due. Returns
    /// the number of deliveries attempted.
    pub async fn retry_failed_deliveries(&self, limit: i64) -> Result<usize, DispatchError> {
        let requeued = fanout_db::models::WebhookDelivery::requeue_exhausted(&self.pool, limit)
            .await?
            .len();
        if requeued > 0 {
            tracing::info!(
                target: "event_dispatch",
                requeued,
                "Re-queued exhausted deliveries for retry"
            );
        }

        Ok(self.deliveries.process_due_retries(limit).await?)
    }

    /// Process deliveries whose scheduled retry is due.
    pub async fn process_due_retries(&self, limit: i64) -> Result<usize, DispatchError> {
        Ok(self.deliveries.process_due_retries(limit).await?)
    }

    /// Cancel a delivery, suppressing further scheduled retries.
    pub async fn cancel_delivery(
        &self,
        tenant_id: Uuid,
        delivery_id: Uuid,
        reason: &str,
    ) -> Result<(), DispatchError> {
        Ok(self
            .deliveries
            .cancel_delivery(tenant_id, delivery_id, reason)
            .await?)
    }

    // -----------------------------------------------------------------
    // Maintenance and admin
    // -----------------------------------------------------------------

    /// Force an action-cache refresh. Call after action create/update/delete.
    pub async fn reload_actions(&self) -> Result<usize, DispatchError> {
        Ok(self.registry.reload().await?)
    }

    /// Return claims abandoned by crashed workers to the claimable pool.
    pub async fn release_stale_claims(&self) -> Result<u64, DispatchError> {
        Ok(DomainEvent::release_stale_claims(&self.pool, self.claim_stale_secs).await?)
    }

    /// Store reachability plus backlog size.
    pub async fn health(&self) -> HealthStatus {
        let database = sqlx::query("SELECT 1").execute(&self.pool).await.is_ok();
        let unprocessed_events = if database {
            DomainEvent::count_unprocessed(&self.pool).await.unwrap_or(-1)
        } else {
            -1
        };

        HealthStatus {
            database,
            unprocessed_events,
        }
    }

    /// Whether endpoint URLs may use HTTP / internal hosts in this
    /// environment. Exposed for the admin layer's endpoint validation.
    #[must_use]
    pub fn url_policy(&self) -> (bool, bool) {
        (self.allow_http, self.allow_internal_hosts)
    }
}

/// Approximate in-memory footprint of one claimed event.
fn estimate_event_bytes(event: &DomainEvent) -> usize {
    serde_json::to_vec(&event.payload).map_or(0, |v| v.len())
        + serde_json::to_vec(&event.metadata).map_or(0, |v| v.len())
        + event.event_type.len()
        + event.aggregate_type.len()
}
