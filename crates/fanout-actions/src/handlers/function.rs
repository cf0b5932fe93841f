//! Function action handler.
//!
//! Invokes a deployed function through its HTTP trigger with the event data
//! as the invocation payload.

use async_trait::async_trait;

use super::{optional_headers, post_json, require_str, ActionHandler, HandlerError, HandlerOutcome};

/// Configuration: `{"function_url": "...", "headers": {...}?}`.
pub struct FunctionActionHandler {
    client: reqwest::Client,
}

impl FunctionActionHandler {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionHandler for FunctionActionHandler {
    async fn execute(
        &self,
        configuration: &serde_json::Value,
        event_data: &serde_json::Value,
    ) -> Result<HandlerOutcome, HandlerError> {
        let function_url = require_str(configuration, "function_url")?;
        let headers = optional_headers(configuration);

        post_json(&self.client, function_url, &headers, event_data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_requires_function_url() {
        let handler = FunctionActionHandler::new(reqwest::Client::new());
        assert!(matches!(
            handler.execute(&json!({}), &json!({})).await,
            Err(HandlerError::InvalidConfiguration(_))
        ));
    }
}
