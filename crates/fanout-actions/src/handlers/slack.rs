//! Slack action handler.
//!
//! Posts a message to an incoming-webhook URL. The message text may embed
//! payload fields via `{field.path}` placeholders.

use async_trait::async_trait;
use serde_json::json;

use fanout_core::condition::lookup_path;

use super::{post_json, require_str, ActionHandler, HandlerError, HandlerOutcome};

/// Configuration: `{"webhook_url": "...", "text": "...", "channel": "..."?}`.
pub struct SlackActionHandler {
    client: reqwest::Client,
}

impl SlackActionHandler {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ActionHandler for SlackActionHandler {
    async fn execute(
        &self,
        configuration: &serde_json::Value,
        event_data: &serde_json::Value,
    ) -> Result<HandlerOutcome, HandlerError> {
        let webhook_url = require_str(configuration, "webhook_url")?;
        let text = require_str(configuration, "text")?;

        let mut body = json!({
            "text": render_placeholders(text, event_data),
        });
        if let Some(channel) = configuration.get("channel").and_then(|v| v.as_str()) {
            body["channel"] = json!(channel);
        }

        post_json(&self.client, webhook_url, &Default::default(), &body).await
    }
}

/// Replace `{field.path}` placeholders with payload values.
///
/// Unresolvable placeholders are left verbatim so a typo is visible in the
/// posted message instead of silently dropped.
fn render_placeholders(template: &str, payload: &serde_json::Value) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        result.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        match after.find('}') {
            Some(end) => {
                let path = &after[..end];
                match lookup_path(payload, path) {
                    Some(serde_json::Value::String(s)) => result.push_str(s),
                    Some(value) => result.push_str(&value.to_string()),
                    None => {
                        result.push('{');
                        result.push_str(path);
                        result.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                result.push('{');
                rest = after;
            }
        }
    }

    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_placeholders() {
        let payload = json!({"data": {"plan": "pro", "seats": 5}});
        assert_eq!(
            render_placeholders("plan {data.plan} with {data.seats} seats", &payload),
            "plan pro with 5 seats"
        );
    }

    #[test]
    fn test_unresolvable_placeholder_kept() {
        let payload = json!({});
        assert_eq!(
            render_placeholders("value: {data.missing}", &payload),
            "value: {data.missing}"
        );
    }

    #[test]
    fn test_unterminated_brace() {
        assert_eq!(render_placeholders("oops {data.plan", &json!({})), "oops {data.plan");
    }

    #[tokio::test]
    async fn test_requires_webhook_url_and_text() {
        let handler = SlackActionHandler::new(reqwest::Client::new());
        assert!(handler.execute(&json!({"text": "hi"}), &json!({})).await.is_err());
        assert!(handler
            .execute(&json!({"webhook_url": "https://hooks.slack.com/x"}), &json!({}))
            .await
            .is_err());
    }
}
