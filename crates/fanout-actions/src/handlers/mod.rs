//! Pluggable action handlers.
//!
//! One implementation of [`ActionHandler`] per handler kind, selected via a
//! registration map built at startup. Built-in handlers invoke their
//! neighboring subsystems (email sender, SMS gateway, chat webhook,
//! function runtime, workflow trigger) over HTTP; their internal semantics
//! are owned elsewhere.

pub mod email;
pub mod function;
pub mod slack;
pub mod sms;
pub mod webhook;
pub mod workflow;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fanout_db::models::HandlerType;

/// Errors from handler invocations.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The action's configuration document is missing or malformed.
    #[error("Invalid handler configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("HTTP error: status {status}, body: {body}")]
    HttpError { status: u16, body: String },
}

/// Structured result of one handler invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerOutcome {
    pub success: bool,
    pub detail: Option<String>,
}

impl HandlerOutcome {
    #[must_use]
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: Some(detail.into()),
        }
    }

    #[must_use]
    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: Some(detail.into()),
        }
    }
}

/// One pluggable side-effect implementation.
///
/// Receives the action's configuration document and the event data; the
/// executor owns timeouts, retries, and bookkeeping around this call.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        configuration: &serde_json::Value,
        event_data: &serde_json::Value,
    ) -> Result<HandlerOutcome, HandlerError>;
}

/// HTTP headers that must not be overridden by action configuration.
const DENIED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "transfer-encoding",
    "connection",
    "upgrade",
    "te",
    "trailer",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "forwarded",
];

/// Filter configured headers, removing any from the denylist.
pub(crate) fn sanitize_headers(headers: HashMap<String, String>) -> HashMap<String, String> {
    headers
        .into_iter()
        .filter(|(k, _)| !DENIED_HEADERS.contains(&k.to_ascii_lowercase().as_str()))
        .collect()
}

/// Read a required string field from a configuration document.
pub(crate) fn require_str<'a>(
    configuration: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, HandlerError> {
    configuration
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            HandlerError::InvalidConfiguration(format!("missing required field '{field}'"))
        })
}

/// Read an optional header map from a configuration document.
pub(crate) fn optional_headers(configuration: &serde_json::Value) -> HashMap<String, String> {
    let raw: HashMap<String, String> = configuration
        .get("headers")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();
    sanitize_headers(raw)
}

/// Shared JSON POST used by the built-in handlers.
///
/// A 2xx response is a successful outcome; anything else is an
/// [`HandlerError::HttpError`]. The executor wraps this call in the
/// action's timeout.
pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    headers: &HashMap<String, String>,
    body: &serde_json::Value,
) -> Result<HandlerOutcome, HandlerError> {
    let start = Instant::now();

    let mut request = client.post(url).json(body);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request.send().await.map_err(|e| {
        if e.is_connect() {
            HandlerError::ConnectionFailed(format!("connect to {url} failed: {e}"))
        } else {
            HandlerError::SendFailed(e.to_string())
        }
    })?;

    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        Ok(HandlerOutcome::success(format!(
            "HTTP {status} in {}ms",
            start.elapsed().as_millis()
        )))
    } else {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unable to read response body".to_string());
        Err(HandlerError::HttpError { status, body })
    }
}

/// Registration map from handler kind to implementation, built at startup.
///
/// Open for extension: register a new implementation instead of adding
/// string-matching branches to the executor.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerType, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in handler bound.
    #[must_use]
    pub fn with_defaults() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("fanout-actions/0.3")
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();

        Self::new()
            .register(HandlerType::Webhook, webhook::WebhookActionHandler::new(client.clone()))
            .register(HandlerType::Email, email::EmailActionHandler::new(client.clone()))
            .register(HandlerType::Sms, sms::SmsActionHandler::new(client.clone()))
            .register(HandlerType::Slack, slack::SlackActionHandler::new(client.clone()))
            .register(HandlerType::Function, function::FunctionActionHandler::new(client.clone()))
            .register(HandlerType::Workflow, workflow::WorkflowActionHandler::new(client))
    }

    /// Bind an implementation to a handler kind, replacing any previous one.
    #[must_use]
    pub fn register(mut self, kind: HandlerType, handler: impl ActionHandler + 'static) -> Self {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Look up the implementation for a handler kind.
    #[must_use]
    pub fn get(&self, kind: HandlerType) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&kind).cloned()
    }
}
