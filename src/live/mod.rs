//! Consumer-facing channel handles.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | [`LiveChannel`] handle and state machine |
//! | `status` | [`ChannelState`] and [`ChannelStatus`] |
//! | `stream` | [`MessageStream`] |

// ============================================================================
// Submodules
// ============================================================================

/// Live channel handle and state machine.
pub mod channel;

/// Channel state and status snapshots.
pub mod status;

/// Consumer streams.
pub mod stream;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::LiveChannel;
pub use status::{ChannelState, ChannelStatus};
pub use stream::MessageStream;
