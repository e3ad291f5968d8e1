//! Transport layer.
//!
//! The physical pub/sub connection lives in an isolated [`TransportContext`]
//! task. The multiplexer reaches it only through a [`TransportLink`] carrying
//! [`Request`](crate::protocol::Request)s one way and
//! [`Event`](crate::protocol::Event)s the other.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐   Request    ┌──────────────────┐              ┌──────────┐
//! │   Multiplexer   │─────────────►│ TransportContext │  WebSocket   │  Server  │
//! │                 │◄─────────────│  → WsProvider    │◄────────────►│          │
//! └─────────────────┘    Event     └──────────────────┘              └──────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `context` | Transport task, link and loopback |
//! | `provider` | Pub/sub provider trait |
//! | `websocket` | WebSocket provider |

// ============================================================================
// Submodules
// ============================================================================

/// Transport task and link.
pub mod context;

/// Pub/sub provider seam.
pub mod provider;

/// WebSocket pub/sub provider.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use context::{RemoteEnd, TransportContext, TransportLink};
pub use provider::{ProviderEvent, TransportProvider};
pub use websocket::{WsOptions, WsProvider};
