//! Error types for live channels.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use live_channels::{Result, Error};
//!
//! fn example(channel: &LiveChannel) -> Result<()> {
//!     channel.publish(serde_json::json!({ "text": "hello" }))?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Resolution | [`Error::InvalidScope`], [`Error::StreamingNotSupported`], [`Error::UnknownPath`], [`Error::Lookup`] |
//! | Channel | [`Error::PublishNotSupported`], [`Error::ChannelNotReady`], [`Error::ChannelClosed`], [`Error::MessageRejected`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::TransportClosed`] |
//! | Protocol | [`Error::Protocol`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::ChannelId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging. Resolution errors
/// render the exact text that ends up in a channel's status.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the multiplexer configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Resolution Errors
    // ========================================================================
    /// The address names a scope that is not registered.
    #[error("invalid scope")]
    InvalidScope,

    /// The namespace resolved to no channel support.
    #[error("{namespace} does not support streaming")]
    StreamingNotSupported {
        /// Namespace that was looked up.
        namespace: String,
    },

    /// The channel support has no config for the path.
    #[error("unknown path: {path}")]
    UnknownPath {
        /// Path that was looked up.
        path: String,
    },

    /// A scope resolver failed while fetching namespace metadata.
    #[error("{message}")]
    Lookup {
        /// Description of the lookup failure.
        message: String,
    },

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// Publishing is not allowed on this channel.
    #[error("Channel {channel_id} does not support publishing")]
    PublishNotSupported {
        /// Channel that rejected the publish.
        channel_id: ChannelId,
    },

    /// The channel config has not been resolved yet.
    #[error("Channel {channel_id} is not initialized")]
    ChannelNotReady {
        /// Channel that is still pending.
        channel_id: ChannelId,
    },

    /// The channel is in a terminal state.
    #[error("Channel {channel_id} is closed")]
    ChannelClosed {
        /// Channel that was shut down or invalidated.
        channel_id: ChannelId,
    },

    /// A message processor rejected an incoming payload.
    #[error("Message rejected: {message}")]
    MessageRejected {
        /// Description of the rejection.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// WebSocket connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The transport context is no longer accepting requests.
    #[error("Transport closed")]
    TransportClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected frame.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a streaming not supported error.
    #[inline]
    pub fn streaming_not_supported(namespace: impl Into<String>) -> Self {
        Self::StreamingNotSupported {
            namespace: namespace.into(),
        }
    }

    /// Creates an unknown path error.
    #[inline]
    pub fn unknown_path(path: impl Into<String>) -> Self {
        Self::UnknownPath { path: path.into() }
    }

    /// Creates a lookup error.
    #[inline]
    pub fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup {
            message: message.into(),
        }
    }

    /// Creates a publish not supported error.
    #[inline]
    pub fn publish_not_supported(channel_id: ChannelId) -> Self {
        Self::PublishNotSupported { channel_id }
    }

    /// Creates a channel not ready error.
    #[inline]
    pub fn channel_not_ready(channel_id: ChannelId) -> Self {
        Self::ChannelNotReady { channel_id }
    }

    /// Creates a channel closed error.
    #[inline]
    pub fn channel_closed(channel_id: ChannelId) -> Self {
        Self::ChannelClosed { channel_id }
    }

    /// Creates a message rejected error.
    #[inline]
    pub fn message_rejected(message: impl Into<String>) -> Self {
        Self::MessageRejected {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error came from scope or config resolution.
    ///
    /// Resolution errors invalidate the channel and evict it from the registry.
    #[inline]
    #[must_use]
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidScope
                | Self::StreamingNotSupported { .. }
                | Self::UnknownPath { .. }
                | Self::Lookup { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::TransportClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed once the channel or connection settles.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ChannelNotReady { .. } | Self::Connection { .. } | Self::ConnectionClosed
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
