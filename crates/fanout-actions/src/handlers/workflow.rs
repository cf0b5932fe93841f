//! Workflow action handler.
//!
//! Triggers a named workflow in the workflow subsystem. Workflows are
//! opaque here: this handler starts them and reports whether the trigger
//! was accepted, nothing more.

use async_trait::async_trait;
use serde_json::json;

use super::{optional_headers, post_json, require_str, ActionHandler, HandlerError, HandlerOutcome};

/// Configuration: `{"trigger_url": "...", "workflow": "...", "headers": {...}?}`.
pub struct WorkflowActionHandler {
    client: reqwest::Client,
}

impl WorkflowActionHandler {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionHandler for WorkflowActionHandler {
    async fn execute(
        &self,
        configuration: &serde_json::Value,
        event_data: &serde_json::Value,
    ) -> Result<HandlerOutcome, HandlerError> {
        let trigger_url = require_str(configuration, "trigger_url")?;
        let workflow = require_str(configuration, "workflow")?;
        let headers = optional_headers(configuration);

        let body = json!({
            "workflow": workflow,
            "input": event_data,
        });

        post_json(&self.client, trigger_url, &headers, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_requires_workflow_name() {
        let handler = WorkflowActionHandler::new(reqwest::Client::new());
        let config = json!({"trigger_url": "https://workflows.example.com/run"});
        assert!(matches!(
            handler.execute(&config, &json!({})).await,
            Err(HandlerError::InvalidConfiguration(_))
        ));
    }
}
