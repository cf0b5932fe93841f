//! SMS action handler.
//!
//! Submits a send request to the SMS gateway subsystem.

use async_trait::async_trait;
use serde_json::json;

use super::{optional_headers, post_json, require_str, ActionHandler, HandlerError, HandlerOutcome};

/// Configuration: `{"gateway_url": "...", "to": "...", "message": "...", "headers": {...}?}`.
pub struct SmsActionHandler {
    client: reqwest::Client,
}

impl SmsActionHandler {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionHandler for SmsActionHandler {
    async fn execute(
        &self,
        configuration: &serde_json::Value,
        event_data: &serde_json::Value,
    ) -> Result<HandlerOutcome, HandlerError> {
        let gateway_url = require_str(configuration, "gateway_url")?;
        let to = require_str(configuration, "to")?;
        let message = require_str(configuration, "message")?;
        let headers = optional_headers(configuration);

        let body = json!({
            "to": to,
            "message": message,
            "context": event_data,
        });

        post_json(&self.client, gateway_url, &headers, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_requires_recipient() {
        let handler = SmsActionHandler::new(reqwest::Client::new());
        let config = json!({"gateway_url": "https://sms.example.com", "message": "hi"});
        assert!(matches!(
            handler.execute(&config, &json!({})).await,
            Err(HandlerError::InvalidConfiguration(_))
        ));
    }
}
