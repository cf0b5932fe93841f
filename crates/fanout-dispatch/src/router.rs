//! Read-only admin router.
//!
//! The administrative CRUD surface lives in a neighboring layer; this
//! router only exposes what that layer consumes from the dispatch
//! platform: health, metrics, circuit breaker state, and the action-cache
//! reload hook.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::dispatcher::EventDispatcher;
use crate::error::DispatchError;

/// Shared state for the admin handlers.
#[derive(Clone)]
pub struct DispatchState {
    pub dispatcher: EventDispatcher,
}

impl DispatchState {
    #[must_use]
    pub fn new(dispatcher: EventDispatcher) -> Self {
        Self { dispatcher }
    }
}

/// Build the admin router.
pub fn dispatch_router(state: DispatchState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/circuit-breakers", get(circuit_breakers_handler))
        .route("/actions/reload", post(reload_actions_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<DispatchState>) -> impl IntoResponse {
    let health = state.dispatcher.health().await;
    let status = if health.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

async fn metrics_handler(State(state): State<DispatchState>) -> impl IntoResponse {
    Json(state.dispatcher.metrics().snapshot())
}

async fn circuit_breakers_handler(State(state): State<DispatchState>) -> impl IntoResponse {
    Json(state.dispatcher.deliveries().breakers().all_statuses().await)
}

#[derive(Serialize)]
struct ReloadResponse {
    actions_loaded: usize,
}

async fn reload_actions_handler(
    State(state): State<DispatchState>,
) -> Result<Json<ReloadResponse>, DispatchError> {
    let actions_loaded = state.dispatcher.reload_actions().await?;
    Ok(Json(ReloadResponse { actions_loaded }))
}
