//! # fanout-actions
//!
//! Configurable event actions for the fanout platform: matching rules with
//! a refreshable in-memory cache (`ActionRegistry`) and handler dispatch
//! with bounded retries (`ActionExecutor`).
//!
//! Handlers are pluggable implementations behind the [`ActionHandler`]
//! trait, bound to a fixed enum of handler kinds through a registration map
//! built at startup. The built-in handlers treat their targets (email
//! sender, SMS gateway, chat webhook, function runtime, workflow trigger)
//! as opaque HTTP collaborators.

pub mod error;
pub mod executor;
pub mod handlers;
pub mod registry;

pub use error::ActionError;
pub use executor::{ActionExecutor, OutcomeHook};
pub use handlers::{ActionHandler, HandlerError, HandlerOutcome, HandlerRegistry};
pub use registry::ActionRegistry;
