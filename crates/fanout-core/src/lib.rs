//! # fanout-core
//!
//! Shared matching primitives for the fanout event platform.
//!
//! Provides the two pure building blocks every dispatch path needs:
//!
//! - **Event type patterns**: validation of `category.action` event type
//!   names and matching against exact, `category.*` wildcard, and universal
//!   `*` patterns.
//! - **Filter conditions**: small predicate expressions evaluated against an
//!   event payload, shared by action rules and subscription filters.
//!
//! Both are deliberately free of I/O so they can be unit tested exhaustively
//! and reused from any crate in the workspace.

pub mod condition;
pub mod error;
pub mod pattern;

pub use condition::{Condition, ConditionOperator};
pub use error::CoreError;
pub use pattern::{matches_pattern, validate_event_type, validate_pattern, wildcard_for};
