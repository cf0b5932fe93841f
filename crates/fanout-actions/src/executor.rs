//! Action executor: dispatches matched actions to their handlers.
//!
//! Honors the action's execution mode:
//!
//! - `sync`: awaited before the event's dispatch completes, but inside its
//!   own spawned task with its own timeout so one slow action cannot stall
//!   other events in the batch.
//! - `async`: fired without blocking the dispatch loop.
//! - `queued`: enqueued to a bounded channel drained by a worker pool.
//!
//! Every invocation records one `ActionExecution` row and updates the
//! action's trigger/success/failure counters. Failures retry up to
//! `max_retries` with a fixed `retry_delay_secs` delay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use fanout_db::models::{
    ActionExecution, CreateActionExecution, EventAction, ExecutionMode, ExecutionStatus,
};

use crate::error::ActionError;
use crate::handlers::{ActionHandler, HandlerRegistry};

/// Default capacity of the queued-mode channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Callback invoked with `(action_id, success)` after every invocation
/// chain completes, on whatever task ran it. Must not block.
pub type OutcomeHook = Arc<dyn Fn(Uuid, bool) + Send + Sync>;

struct QueuedInvocation {
    action: EventAction,
    event_id: Uuid,
    event_data: serde_json::Value,
}

/// Dispatches matched actions to registered handlers.
#[derive(Clone)]
pub struct ActionExecutor {
    pool: PgPool,
    handlers: Arc<HandlerRegistry>,
    queue_tx: mpsc::Sender<QueuedInvocation>,
    queue_rx: Arc<Mutex<Option<mpsc::Receiver<QueuedInvocation>>>>,
    queue_started: Arc<AtomicBool>,
    outcome_hook: Option<OutcomeHook>,
}

impl ActionExecutor {
    #[must_use]
    pub fn new(pool: PgPool, handlers: HandlerRegistry) -> Self {
        Self::with_queue_capacity(pool, handlers, DEFAULT_QUEUE_CAPACITY)
    }

    #[must_use]
    pub fn with_queue_capacity(
        pool: PgPool,
        handlers: HandlerRegistry,
        queue_capacity: usize,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            pool,
            handlers: Arc::new(handlers),
            queue_tx,
            queue_rx: Arc::new(Mutex::new(Some(queue_rx))),
            queue_started: Arc::new(AtomicBool::new(false)),
            outcome_hook: None,
        }
    }

    /// Install a callback observing every invocation outcome, e.g. for a
    /// metrics collector.
    #[must_use]
    pub fn with_outcome_hook(mut self, hook: impl Fn(Uuid, bool) + Send + Sync + 'static) -> Self {
        self.outcome_hook = Some(Arc::new(hook));
        self
    }

    /// Start the worker pool draining the queued-mode channel.
    ///
    /// Call once at startup; subsequent calls are no-ops. Until started,
    /// queued invocations fall back to async execution.
    pub async fn start_queue_workers(&self, worker_count: usize) {
        let Some(rx) = self.queue_rx.lock().await.take() else {
            return;
        };
        self.queue_started.store(true, Ordering::Release);

        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..worker_count.max(1) {
            let rx = Arc::clone(&rx);
            let pool = self.pool.clone();
            let handlers = Arc::clone(&self.handlers);
            let hook = self.outcome_hook.clone();

            tokio::spawn(async move {
                tracing::debug!(target: "action_executor", worker, "Queue worker started");
                loop {
                    let invocation = { rx.lock().await.recv().await };
                    let Some(invocation) = invocation else {
                        tracing::debug!(target: "action_executor", worker, "Queue worker stopping");
                        break;
                    };

                    let Some(handler) = handlers.get(invocation.action.handler_type) else {
                        continue;
                    };
                    run_invocation(
                        &pool,
                        handler,
                        invocation.action,
                        invocation.event_id,
                        invocation.event_data,
                        hook.clone(),
                    )
                    .await;
                }
            });
        }
    }

    /// Execute one matched action against one event, honoring its execution
    /// mode.
    ///
    /// Never fails the batch: an unknown handler type disables the action
    /// and returns; handler failures are recorded on the execution row.
    pub async fn execute(
        &self,
        action: &EventAction,
        event_id: Uuid,
        event_data: &serde_json::Value,
    ) -> Result<(), ActionError> {
        if let Err(e) = EventAction::record_trigger(&self.pool, action.id).await {
            tracing::error!(
                target: "action_executor",
                action_id = %action.id,
                error = %e,
                "Failed to record action trigger"
            );
        }

        let Some(handler) = self.handlers.get(action.handler_type) else {
            tracing::error!(
                target: "action_executor",
                action_id = %action.id,
                handler_type = %action.handler_type,
                "No handler registered; disabling action"
            );
            if let Err(e) = EventAction::disable(&self.pool, action.id).await {
                tracing::error!(
                    target: "action_executor",
                    action_id = %action.id,
                    error = %e,
                    "Failed to disable misconfigured action"
                );
            }
            return Ok(());
        };

        match action.execution_mode {
            ExecutionMode::Sync => {
                // Isolated task: a panicking handler cannot take down the
                // dispatch loop, and the timeout is scoped to this action.
                let pool = self.pool.clone();
                let action = action.clone();
                let event_data = event_data.clone();
                let hook = self.outcome_hook.clone();
                let handle = tokio::spawn(async move {
                    run_invocation(&pool, handler, action, event_id, event_data, hook).await;
                });
                if let Err(e) = handle.await {
                    tracing::error!(
                        target: "action_executor",
                        error = %e,
                        "Sync action task failed"
                    );
                }
            }
            ExecutionMode::Async => {
                let pool = self.pool.clone();
                let action = action.clone();
                let event_data = event_data.clone();
                let hook = self.outcome_hook.clone();
                tokio::spawn(async move {
                    run_invocation(&pool, handler, action, event_id, event_data, hook).await;
                });
            }
            ExecutionMode::Queued => {
                let queued = if self.queue_started.load(Ordering::Acquire) {
                    let invocation = QueuedInvocation {
                        action: action.clone(),
                        event_id,
                        event_data: event_data.clone(),
                    };
                    match self.queue_tx.try_send(invocation) {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::warn!(
                                target: "action_executor",
                                action_id = %action.id,
                                error = %e,
                                "Action queue full; executing asynchronously"
                            );
                            false
                        }
                    }
                } else {
                    false
                };

                // No worker pool (or queue full): degrade to async rather
                // than dropping the invocation.
                if !queued {
                    let pool = self.pool.clone();
                    let action = action.clone();
                    let event_data = event_data.clone();
                    let hook = self.outcome_hook.clone();
                    tokio::spawn(async move {
                        run_invocation(&pool, handler, action, event_id, event_data, hook).await;
                    });
                }
            }
        }

        Ok(())
    }
}

/// Run one invocation chain: initial attempt plus bounded fixed-delay
/// retries, recording the `ActionExecution` outcome and counters.
async fn run_invocation(
    pool: &PgPool,
    handler: Arc<dyn ActionHandler>,
    action: EventAction,
    event_id: Uuid,
    event_data: serde_json::Value,
    outcome_hook: Option<OutcomeHook>,
) {
    let execution = match ActionExecution::create(
        pool,
        CreateActionExecution {
            action_id: action.id,
            event_id,
        },
    )
    .await
    {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(
                target: "action_executor",
                action_id = %action.id,
                event_id = %event_id,
                error = %e,
                "Failed to open execution record"
            );
            return;
        }
    };

    let timeout = Duration::from_secs(action.timeout_secs.max(1) as u64);
    let retry_delay = Duration::from_secs(action.retry_delay_secs.max(0) as u64);
    let start = Instant::now();

    let mut retries_used = 0;
    let mut last_error = String::new();
    let mut timed_out = false;
    let mut outcome_detail = None;
    let mut succeeded = false;

    for attempt in 0..=action.max_retries.max(0) {
        retries_used = attempt;

        match tokio::time::timeout(
            timeout,
            handler.execute(&action.configuration, &event_data),
        )
        .await
        {
            Ok(Ok(outcome)) if outcome.success => {
                succeeded = true;
                outcome_detail = outcome.detail;
                break;
            }
            Ok(Ok(outcome)) => {
                timed_out = false;
                last_error = outcome
                    .detail
                    .unwrap_or_else(|| "handler reported failure".to_string());
            }
            Ok(Err(e)) => {
                timed_out = false;
                last_error = e.to_string();
            }
            Err(_) => {
                timed_out = true;
                last_error = format!("Handler timed out after {}s", action.timeout_secs);
            }
        }

        if attempt < action.max_retries {
            tracing::debug!(
                target: "action_executor",
                action_id = %action.id,
                event_id = %event_id,
                attempt = attempt + 1,
                error = %last_error,
                "Action attempt failed; retrying after fixed delay"
            );
            tokio::time::sleep(retry_delay).await;
        }
    }

    let duration_ms = start.elapsed().as_millis() as i32;
    let status = if succeeded {
        ExecutionStatus::Succeeded
    } else {
        final_failure_status(timed_out)
    };

    if succeeded {
        tracing::info!(
            target: "action_executor",
            action_id = %action.id,
            event_id = %event_id,
            retries_used,
            duration_ms,
            "Action executed"
        );
    } else {
        tracing::warn!(
            target: "action_executor",
            action_id = %action.id,
            event_id = %event_id,
            retries_used,
            duration_ms,
            error = %last_error,
            "Action failed after retries"
        );
    }

    if let Err(e) = ActionExecution::complete(
        pool,
        execution.id,
        status,
        retries_used,
        duration_ms,
        (!succeeded).then_some(last_error.as_str()),
        outcome_detail.as_deref(),
    )
    .await
    {
        tracing::error!(
            target: "action_executor",
            execution_id = %execution.id,
            error = %e,
            "Failed to close execution record"
        );
    }

    if let Err(e) = EventAction::record_outcome(pool, action.id, succeeded).await {
        tracing::error!(
            target: "action_executor",
            action_id = %action.id,
            error = %e,
            "Failed to update action counters"
        );
    }

    if let Some(hook) = outcome_hook {
        hook(action.id, succeeded);
    }
}

/// Final status for an invocation chain that never succeeded.
fn final_failure_status(timed_out: bool) -> ExecutionStatus {
    if timed_out {
        ExecutionStatus::TimedOut
    } else {
        ExecutionStatus::Failed
    }
}
