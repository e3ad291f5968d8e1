//! Request message types.
//!
//! Requests flow from the orchestrator to the transport context. None of
//! them expects a reply; outcomes come back as [`Event`](super::Event)s.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::{ChannelId, SessionId};

// ============================================================================
// Request
// ============================================================================

/// A request from the orchestrator to the transport context.
///
/// # Format
///
/// ```json
/// { "type": "subscribe", "id": "grafana/broadcast/room1" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    /// Open the physical connection.
    Connect {
        /// Opaque session id passed as connect data.
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        /// WebSocket endpoint.
        url: String,
    },

    /// Subscribe to a channel.
    Subscribe {
        /// Channel to subscribe to.
        id: ChannelId,
    },

    /// Tear down a channel subscription.
    Unsubscribe {
        /// Channel to release.
        id: ChannelId,
    },

    /// Publish a payload on a channel.
    Publish {
        /// Target channel.
        id: ChannelId,
        /// Payload.
        data: Value,
    },
}

impl Request {
    /// Returns the channel this request targets, if any.
    #[inline]
    #[must_use]
    pub fn channel_id(&self) -> Option<&ChannelId> {
        match self {
            Self::Connect { .. } => None,
            Self::Subscribe { id } | Self::Unsubscribe { id } | Self::Publish { id, .. } => {
                Some(id)
            }
        }
    }

    /// Returns the request name for logging.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Publish { .. } => "publish",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
