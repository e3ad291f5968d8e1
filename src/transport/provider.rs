//! Pub/sub provider seam.
//!
//! The transport context drives exactly one provider. The provider owns the
//! wire protocol, queuing and reconnection; the context only sees the
//! operations below and the [`ProviderEvent`]s they produce.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::identifiers::SessionId;

// ============================================================================
// ProviderEvent
// ============================================================================

/// Notification emitted by a provider, keyed by raw channel name.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// Connection established (or re-established).
    Connected,
    /// Connection lost.
    Disconnected {
        /// Why the connection went away.
        reason: String,
    },
    /// Subscription acknowledged by the server.
    Subscribed {
        /// Channel name.
        channel: String,
        /// Server context.
        context: Value,
    },
    /// Subscription rejected by the server.
    SubscribeFailed {
        /// Channel name.
        channel: String,
        /// Error context.
        context: Value,
    },
    /// Subscription ended by the server.
    Unsubscribed {
        /// Channel name.
        channel: String,
        /// Server context.
        context: Value,
    },
    /// Publication on a channel.
    Publication {
        /// Channel name.
        channel: String,
        /// Publication context, payload under `data`.
        context: Value,
    },
}

// ============================================================================
// TransportProvider
// ============================================================================

/// External pub/sub client surface.
///
/// Implementations must accept `subscribe` before `connect` has completed
/// and apply it once the connection is up.
#[async_trait]
pub trait TransportProvider: Send + 'static {
    /// Opens the connection and returns the provider's event stream.
    async fn connect(
        &mut self,
        session_id: &SessionId,
        url: &str,
    ) -> Result<mpsc::UnboundedReceiver<ProviderEvent>>;

    /// Subscribes to a channel.
    async fn subscribe(&mut self, channel: &str) -> Result<()>;

    /// Unsubscribes from a channel without waiting for acknowledgement.
    async fn unsubscribe(&mut self, channel: &str) -> Result<()>;

    /// Publishes on a channel without waiting for acknowledgement.
    async fn publish(&mut self, channel: &str, data: Value) -> Result<()>;

    /// Closes the connection.
    async fn close(&mut self);
}
