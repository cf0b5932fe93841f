//! Email action handler.
//!
//! Submits a send request to the email subsystem's gateway. Template
//! rendering and delivery are owned by that subsystem.

use async_trait::async_trait;
use serde_json::json;

use super::{optional_headers, post_json, require_str, ActionHandler, HandlerError, HandlerOutcome};

/// Configuration:
/// `{"gateway_url": "...", "to": "...", "template": "...", "headers": {...}?}`.
pub struct EmailActionHandler {
    client: reqwest::Client,
}

impl EmailActionHandler {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionHandler for EmailActionHandler {
    async fn execute(
        &self,
        configuration: &serde_json::Value,
        event_data: &serde_json::Value,
    ) -> Result<HandlerOutcome, HandlerError> {
        let gateway_url = require_str(configuration, "gateway_url")?;
        let to = require_str(configuration, "to")?;
        let template = require_str(configuration, "template")?;
        let headers = optional_headers(configuration);

        let body = json!({
            "to": to,
            "template": template,
            "context": event_data,
        });

        post_json(&self.client, gateway_url, &headers, &body).await
    }
}
