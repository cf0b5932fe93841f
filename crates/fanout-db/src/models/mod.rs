//! Database entity models for fanout-db.
//!
//! These models represent the database tables and provide
//! type-safe interactions with PostgreSQL.

pub mod action_execution;
pub mod domain_event;
pub mod event_action;
pub mod webhook_delivery;
pub mod webhook_endpoint;
pub mod webhook_event_type;
pub mod webhook_subscription;

pub use action_execution::{ActionExecution, CreateActionExecution, ExecutionStatus};
pub use domain_event::{CreateDomainEvent, DomainEvent};
pub use event_action::{
    ActionStatus, CreateEventAction, EventAction, ExecutionMode, HandlerType,
};
pub use webhook_delivery::{
    CreateDeliveryAttempt, CreateWebhookDelivery, DeliveryStatus, WebhookDelivery,
    WebhookDeliveryAttempt,
};
pub use webhook_endpoint::{CreateWebhookEndpoint, UpdateWebhookEndpoint, WebhookEndpoint};
pub use webhook_event_type::{CreateWebhookEventType, WebhookEventType};
pub use webhook_subscription::{
    CreateWebhookSubscription, SubscriptionMatch, WebhookSubscription,
};
