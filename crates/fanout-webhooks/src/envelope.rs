//! Outbound delivery envelope: the JSON body sent to webhook endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use fanout_db::models::DomainEvent;

use crate::error::WebhookError;

/// Wire format of a delivered event.
///
/// ```json
/// {
///   "event_id": "...",
///   "event_type": "organization.created",
///   "occurred_at": "...",
///   "aggregate_type": "organization",
///   "aggregate_id": "...",
///   "data": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub data: serde_json::Value,
}

impl DeliveryEnvelope {
    /// Build the envelope for a stored event.
    #[must_use]
    pub fn from_event(event: &DomainEvent) -> Self {
        Self {
            event_id: event.id,
            event_type: event.event_type.clone(),
            occurred_at: event.occurred_at,
            aggregate_type: event.aggregate_type.clone(),
            aggregate_id: event.aggregate_id,
            data: event.payload.clone(),
        }
    }

    /// Serialize to the raw bytes that are signed and sent.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WebhookError> {
        serde_json::to_vec(self).map_err(|e| WebhookError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = DeliveryEnvelope {
            event_id: Uuid::now_v7(),
            event_type: "organization.created".to_string(),
            occurred_at: Utc::now(),
            aggregate_type: "organization".to_string(),
            aggregate_id: Uuid::new_v4(),
            data: serde_json::json!({"name": "Acme"}),
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert!(value.get("event_id").is_some());
        assert_eq!(value["event_type"], "organization.created");
        assert_eq!(value["data"]["name"], "Acme");
        // Payload rides under `data`, never at the top level.
        assert!(value.get("name").is_none());
    }

    #[test]
    fn test_envelope_bytes_round_trip() {
        let envelope = DeliveryEnvelope {
            event_id: Uuid::now_v7(),
            event_type: "user.created".to_string(),
            occurred_at: Utc::now(),
            aggregate_type: "user".to_string(),
            aggregate_id: Uuid::new_v4(),
            data: serde_json::json!({}),
        };

        let bytes = envelope.to_bytes().unwrap();
        let back: DeliveryEnvelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.event_id, envelope.event_id);
    }
}
