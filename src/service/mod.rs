//! Channel multiplexer service.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Multiplexer`] | Channel registry and event router |
//! | [`MultiplexerBuilder`] | Fluent configuration builder |
//! | [`LiveOptions`] | Linger and buffer tuning |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder pattern for multiplexer configuration.
pub mod builder;

/// Core multiplexer implementation.
pub mod core;

/// Linger and buffer options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::MultiplexerBuilder;
pub use core::Multiplexer;
pub use options::LiveOptions;
