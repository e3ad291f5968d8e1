//! Channel state and status snapshots.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::identifiers::ChannelId;

// ============================================================================
// ChannelState
// ============================================================================

/// Lifecycle state of a live channel.
///
/// ```text
/// Pending ──► Connecting ──► Connected ──► Shutdown
///    │             ▲             │
///    │             └─ Disconnected ◄┘
///    └──────────► Invalid
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ChannelState {
    /// Created, scope and config not resolved yet.
    Pending,
    /// Resolved, waiting for the transport to acknowledge the subscription.
    Connecting,
    /// Subscribed.
    Connected,
    /// Was connected, the physical connection dropped.
    Disconnected,
    /// Resolution failed. Terminal.
    Invalid,
    /// Closed. Terminal.
    Shutdown,
}

impl ChannelState {
    /// Returns `true` for `Invalid` and `Shutdown`.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Invalid | Self::Shutdown)
    }

    /// Returns the state name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Invalid => "invalid",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ChannelStatus
// ============================================================================

/// Snapshot of a channel's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatus {
    /// Channel id.
    pub id: ChannelId,
    /// Current state.
    pub state: ChannelState,
    /// Milliseconds since the Unix epoch of the last change.
    pub timestamp: u64,
    /// Last error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelStatus {
    /// Creates a pending status.
    #[must_use]
    pub(crate) fn pending(id: ChannelId) -> Self {
        Self {
            id,
            state: ChannelState::Pending,
            timestamp: now_millis(),
            error: None,
        }
    }

    /// Refreshes the timestamp.
    pub(crate) fn touch(&mut self) {
        self.timestamp = now_millis().max(self.timestamp);
    }
}

/// Current wall clock in milliseconds.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ChannelState::Invalid.is_terminal());
        assert!(ChannelState::Shutdown.is_terminal());
        assert!(!ChannelState::Pending.is_terminal());
        assert!(!ChannelState::Disconnected.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let mut status = ChannelStatus::pending(ChannelId::new("grafana/broadcast/room1"));
        status.state = ChannelState::Invalid;
        status.error = Some("invalid scope".into());

        let json = serde_json::to_value(&status).expect("serialize");
        assert_eq!(json["state"], "invalid");
        assert_eq!(json["error"], "invalid scope");
        assert_eq!(json["id"], "grafana/broadcast/room1");
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut status = ChannelStatus::pending(ChannelId::new("a/b/c"));
        status.timestamp = u64::MAX - 1;
        status.touch();
        assert_eq!(status.timestamp, u64::MAX - 1);
    }
}
