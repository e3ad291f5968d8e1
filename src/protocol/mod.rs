//! Cross-context message types.
//!
//! This module defines the vocabulary exchanged between the orchestrator
//! (multiplexer) and the isolated transport context.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Orchestrator → Transport | Connect, subscribe, unsubscribe, publish |
//! | `Event` | Transport → Orchestrator | Connection edges and per-channel notifications |
//!
//! Requests are fire-and-forget. Events are correlated to channels only by
//! the [`ChannelId`](crate::identifiers::ChannelId) they carry.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `event` | Event type |
//! | `request` | Request type |

// ============================================================================
// Submodules
// ============================================================================

/// Event message types.
pub mod event;

/// Request message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::Event;
pub use request::Request;
