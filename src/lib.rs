//! Live channels - multiplexed real-time streaming over one connection.
//!
//! This library lets many independent consumers subscribe to named, scoped
//! data channels while sharing a single physical WebSocket connection.
//!
//! # Architecture
//!
//! The subsystem runs in two cooperating contexts:
//!
//! - **Orchestrator**: the [`Multiplexer`], the scope registry and every
//!   [`LiveChannel`]
//! - **Transport context**: a spawned task owning the provider connection
//!   and the per-channel subscriptions
//!
//! Key design principles:
//!
//! - The two contexts share no memory; they exchange [`protocol`] messages
//! - At most one open channel per `scope/namespace/path`
//! - Channel capabilities are resolved lazily and memoized per namespace
//! - A failing channel never affects its neighbours
//!
//! # Quick Start
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use live_channels::{ChannelAddress, Multiplexer, Result, SessionId, WsProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mux = Multiplexer::builder()
//!         .session(SessionId::generate("admin"))
//!         .app_url("http://localhost:3000/")
//!         .start_with(WsProvider::default())?;
//!
//!     let channel = mux.channel(ChannelAddress::new("grafana", "broadcast", "room1"));
//!     let mut messages = channel.messages();
//!
//!     while let Some(message) = messages.next().await {
//!         println!("{message}");
//!     }
//!
//!     mux.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Channel and session identifiers |
//! | [`live`] | [`LiveChannel`] handle, status and message stream |
//! | [`protocol`] | Messages crossing the transport boundary |
//! | [`scope`] | Scope resolvers and channel configs |
//! | [`service`] | [`Multiplexer`] and its builder |
//! | [`transport`] | Transport context and providers |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Channel and session identifiers.
pub mod identifiers;

/// Consumer-facing channel handles.
pub mod live;

/// Request and event messages.
///
/// Both are serde tagged unions so they can cross a process boundary.
pub mod protocol;

/// Scope resolvers and channel configs.
pub mod scope;

/// Channel multiplexer service.
///
/// Use [`Multiplexer::builder()`] to create a configured instance.
pub mod service;

/// Transport context and pub/sub providers.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ChannelAddress, ChannelId, SessionId};

// Channel types
pub use live::{ChannelState, ChannelStatus, LiveChannel, MessageStream};

// Protocol types
pub use protocol::{Event, Request};

// Scope types
pub use scope::{
    ChannelConfig, ChannelSupport, CoreFeatures, DataSourceLookup, DataSourceMeta,
    DataSourceScope, LiveScope, PluginLookup, PluginMeta, PluginScope, ScopeRegistry,
    ScopeResolver, StreamScope,
};

// Service types
pub use service::{LiveOptions, Multiplexer, MultiplexerBuilder};

// Transport types
pub use transport::{
    ProviderEvent, RemoteEnd, TransportContext, TransportLink, TransportProvider, WsOptions,
    WsProvider,
};
