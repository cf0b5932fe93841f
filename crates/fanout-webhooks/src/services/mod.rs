//! Webhook services: subscription matching and delivery execution.

pub mod delivery_service;
pub mod subscription_index;
