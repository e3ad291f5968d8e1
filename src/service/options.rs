//! Multiplexer tuning options.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use live_channels::LiveOptions;
//!
//! let options = LiveOptions::new()
//!     .with_linger(Duration::from_secs(1))
//!     .with_message_capacity(1024);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};
use crate::live::channel::ChannelSettings;

// ============================================================================
// Constants
// ============================================================================

/// Default grace period after the last consumer leaves.
const DEFAULT_LINGER: Duration = Duration::from_millis(250);

/// Default per-channel message buffer.
const DEFAULT_MESSAGE_CAPACITY: usize = 256;

/// Default per-channel status buffer.
const DEFAULT_STATUS_CAPACITY: usize = 32;

/// Default connection edge buffer.
const DEFAULT_EDGE_CAPACITY: usize = 32;

// ============================================================================
// LiveOptions
// ============================================================================

/// Channel and observer tuning.
///
/// Buffers are broadcast capacities: a consumer that falls further behind
/// skips ahead and the skip is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveOptions {
    /// Delay between the last message stream being dropped and shutdown.
    pub linger: Duration,

    /// Messages buffered per channel.
    pub message_capacity: usize,

    /// Status changes buffered per channel.
    pub status_capacity: usize,

    /// Connection edges buffered for observers.
    pub edge_capacity: usize,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl LiveOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            linger: DEFAULT_LINGER,
            message_capacity: DEFAULT_MESSAGE_CAPACITY,
            status_capacity: DEFAULT_STATUS_CAPACITY,
            edge_capacity: DEFAULT_EDGE_CAPACITY,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl LiveOptions {
    /// Sets the linger. Zero shuts down as soon as the last consumer leaves.
    #[inline]
    #[must_use]
    pub const fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    /// Sets the per-channel message buffer.
    #[inline]
    #[must_use]
    pub const fn with_message_capacity(mut self, capacity: usize) -> Self {
        self.message_capacity = capacity;
        self
    }

    /// Sets the per-channel status buffer.
    #[inline]
    #[must_use]
    pub const fn with_status_capacity(mut self, capacity: usize) -> Self {
        self.status_capacity = capacity;
        self
    }

    /// Sets the connection edge buffer.
    #[inline]
    #[must_use]
    pub const fn with_edge_capacity(mut self, capacity: usize) -> Self {
        self.edge_capacity = capacity;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl LiveOptions {
    /// Checks every buffer is non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first zero capacity.
    pub fn validate(&self) -> Result<()> {
        let capacities = [
            ("message_capacity", self.message_capacity),
            ("status_capacity", self.status_capacity),
            ("edge_capacity", self.edge_capacity),
        ];

        match capacities.iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(Error::config(format!("{name} must be greater than zero"))),
            None => Ok(()),
        }
    }

    pub(crate) const fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            linger: self.linger,
            message_capacity: self.message_capacity,
            status_capacity: self.status_capacity,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = LiveOptions::default();
        assert_eq!(options.linger, Duration::from_millis(250));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let options = LiveOptions::new()
            .with_linger(Duration::ZERO)
            .with_message_capacity(8)
            .with_status_capacity(4)
            .with_edge_capacity(2);

        assert_eq!(options.linger, Duration::ZERO);
        assert_eq!(options.message_capacity, 8);
        assert_eq!(options.status_capacity, 4);
        assert_eq!(options.edge_capacity, 2);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = LiveOptions::new()
            .with_status_capacity(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("status_capacity"));
    }
}
