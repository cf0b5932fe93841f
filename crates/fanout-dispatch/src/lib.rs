//! # fanout-dispatch
//!
//! Orchestrator for the fanout event platform.
//!
//! [`EventDispatcher`] is the facade tying the subsystem together: it
//! publishes events to the append-only store, claims unprocessed events
//! with skip-locked semantics, resolves matching webhook subscriptions and
//! actions, and drives batch/streaming processing with bounded concurrency.
//! [`DispatchRunner`] is the background poll loop; [`DispatchMetrics`]
//! collects per-endpoint and per-action outcomes with threshold alerts;
//! a small read-only router exposes health and metrics to the admin layer.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod monitoring;
pub mod router;
pub mod runner;

pub use config::DispatchConfig;
pub use dispatcher::{EventDispatcher, PublishEvent};
pub use error::DispatchError;
pub use monitoring::{Alert, DispatchMetrics, MetricsSnapshot};
pub use router::{dispatch_router, DispatchState};
pub use runner::DispatchRunner;
