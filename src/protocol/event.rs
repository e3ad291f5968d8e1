//! Event message types.
//!
//! Events are notifications sent from the transport context back to the
//! orchestrator. Connection edges carry no channel; every other event is
//! tagged with the [`ChannelId`] it belongs to.
//!
//! # Event Types
//!
//! | Event | Meaning |
//! |-------|---------|
//! | `connected` | Physical connection established |
//! | `disconnected` | Physical connection lost |
//! | `subscribed` | Provider acknowledged a subscription |
//! | `unsubscribed` | Subscription ended (server side or local) |
//! | `subscriptionFailed` | Provider rejected or failed a subscription |
//! | `received` | Publication on a channel |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::ChannelId;

// ============================================================================
// Event
// ============================================================================

/// An event from the transport context to the orchestrator.
///
/// # Format
///
/// ```json
/// {
///   "type": "received",
///   "id": "grafana/broadcast/room1",
///   "context": { "data": { ... } }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    /// Connection established.
    Connected,

    /// Connection lost.
    Disconnected,

    /// Subscription acknowledged.
    Subscribed {
        /// Channel id.
        id: ChannelId,
        /// Provider-specific context.
        #[serde(default)]
        context: Value,
    },

    /// Subscription ended.
    Unsubscribed {
        /// Channel id.
        id: ChannelId,
        /// Provider-specific context.
        #[serde(default)]
        context: Value,
    },

    /// Subscription failed.
    SubscriptionFailed {
        /// Channel id.
        id: ChannelId,
        /// Provider-specific context, usually `{ "error": "..." }`.
        #[serde(default)]
        context: Value,
    },

    /// Publication received.
    Received {
        /// Channel id.
        id: ChannelId,
        /// Publication context, payload under `data`.
        #[serde(default)]
        context: Value,
    },
}

impl Event {
    /// Returns the channel this event belongs to, if any.
    #[inline]
    #[must_use]
    pub fn channel_id(&self) -> Option<&ChannelId> {
        match self {
            Self::Connected | Self::Disconnected => None,
            Self::Subscribed { id, .. }
            | Self::Unsubscribed { id, .. }
            | Self::SubscriptionFailed { id, .. }
            | Self::Received { id, .. } => Some(id),
        }
    }

    /// Returns `true` for connection edges.
    #[inline]
    #[must_use]
    pub fn is_connection_edge(&self) -> bool {
        matches!(self, Self::Connected | Self::Disconnected)
    }

    /// Creates a failure event with an error message context.
    #[inline]
    #[must_use]
    pub fn subscription_failed(id: ChannelId, message: impl Into<String>) -> Self {
        Self::SubscriptionFailed {
            id,
            context: serde_json::json!({ "error": message.into() }),
        }
    }

    /// Creates a received event wrapping a payload under `data`.
    #[inline]
    #[must_use]
    pub fn received(id: ChannelId, data: Value) -> Self {
        Self::Received {
            id,
            context: serde_json::json!({ "data": data }),
        }
    }
}

/// Extracts the error text from a failure context.
///
/// Accepts `{ "error": "..." }`, `{ "error": { "message": "..." } }` or a
/// bare string; anything else renders as JSON.
#[must_use]
pub fn error_message(context: &Value) -> String {
    match context.get("error").unwrap_or(context) {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(obj.clone()).to_string()),
        other => other.to_string(),
    }
}

/// Extracts the publication payload from a received context.
///
/// Falls back to the whole context when no `data` field is present.
#[inline]
#[must_use]
pub fn publication_data(context: Value) -> Value {
    match context {
        Value::Object(mut obj) if obj.contains_key("data") => {
            obj.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_event_parsing() {
        let json_str = r#"{
            "type": "received",
            "id": "grafana/broadcast/room1",
            "context": { "data": { "text": "hello" } }
        }"#;

        let event: Event = serde_json::from_str(json_str).expect("parse event");
        assert_eq!(
            event.channel_id().map(ChannelId::as_str),
            Some("grafana/broadcast/room1")
        );
        assert!(!event.is_connection_edge());

        match event {
            Event::Received { context, .. } => {
                assert_eq!(publication_data(context), json!({ "text": "hello" }));
            }
            _ => panic!("unexpected event type"),
        }
    }

    #[test]
    fn test_connection_edges() {
        let event: Event = serde_json::from_str(r#"{"type":"connected"}"#).expect("parse");
        assert_eq!(event, Event::Connected);
        assert!(event.is_connection_edge());
        assert!(event.channel_id().is_none());

        let json = serde_json::to_string(&Event::Disconnected).expect("serialize");
        assert_eq!(json, r#"{"type":"disconnected"}"#);
    }

    #[test]
    fn test_missing_context_defaults_to_null() {
        let event: Event =
            serde_json::from_str(r#"{"type":"subscribed","id":"stream/a/b"}"#).expect("parse");
        assert_eq!(
            event,
            Event::Subscribed {
                id: ChannelId::new("stream/a/b"),
                context: Value::Null,
            }
        );
    }

    #[test]
    fn test_subscription_failed_tag() {
        let event = Event::subscription_failed(ChannelId::new("ds/x/y"), "permission denied");
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "subscriptionFailed");
    }

    #[test]
    fn test_error_message_shapes() {
        assert_eq!(error_message(&json!({ "error": "denied" })), "denied");
        assert_eq!(
            error_message(&json!({ "error": { "code": 103, "message": "permission denied" } })),
            "permission denied"
        );
        assert_eq!(error_message(&json!("boom")), "boom");
        assert_eq!(error_message(&json!({ "code": 1 })), r#"{"code":1}"#);
    }

    #[test]
    fn test_publication_data_fallback() {
        assert_eq!(publication_data(json!(5)), json!(5));
        assert_eq!(
            publication_data(json!({ "value": 1 })),
            json!({ "value": 1 })
        );
    }
}
