//! Generic HTTP webhook action handler.
//!
//! Posts the event data to a configured URL. Unlike subscription-driven
//! webhook deliveries, action webhooks carry no signature or retry state of
//! their own; the executor owns retries.

use async_trait::async_trait;

use super::{optional_headers, post_json, require_str, ActionHandler, HandlerError, HandlerOutcome};

/// Configuration: `{"url": "...", "headers": {...}?}`.
pub struct WebhookActionHandler {
    client: reqwest::Client,
}

impl WebhookActionHandler {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionHandler for WebhookActionHandler {
    async fn execute(
        &self,
        configuration: &serde_json::Value,
        event_data: &serde_json::Value,
    ) -> Result<HandlerOutcome, HandlerError> {
        let url = require_str(configuration, "url")?;
        let headers = optional_headers(configuration);

        post_json(&self.client, url, &headers, event_data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_missing_url_is_configuration_error() {
        let handler = WebhookActionHandler::new(reqwest::Client::new());
        let result = handler.execute(&json!({}), &json!({})).await;
        assert!(matches!(
            result,
            Err(HandlerError::InvalidConfiguration(_))
        ));
    }
}
