//! Scope registry and channel capability resolution.
//!
//! A channel address names a scope, a namespace inside that scope and a path.
//! Resolution happens in two steps:
//!
//! 1. The scope's [`ScopeResolver`] maps the namespace to a
//!    [`ChannelSupport`] (possibly after an async metadata lookup).
//! 2. The support maps the path to a [`ChannelConfig`] synchronously.
//!
//! Scopes form a closed set ([`LiveScope`]) dispatched through a table in
//! [`ScopeRegistry`], which memoizes step 1 per namespace.
//!
//! # Modules
//!
//! | Module | Scope | Description |
//! |--------|-------|-------------|
//! | `features` | `grafana` | In-process core features |
//! | `datasource` | `ds` | Data sources with streaming support |
//! | `plugin` | `plugin` | Plugins with streaming support |
//! | `stream` | `stream` | Ad hoc client-declared streams |
//! | `registry` | - | Dispatch table and memoization |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// Submodules
// ============================================================================

/// Data source scope.
pub mod datasource;

/// Core features scope.
pub mod features;

/// Plugin scope.
pub mod plugin;

/// Scope dispatch table with per-namespace memoization.
pub mod registry;

/// Ad hoc stream scope.
pub mod stream;

// ============================================================================
// Re-exports
// ============================================================================

pub use datasource::{DataSourceLookup, DataSourceMeta, DataSourceScope};
pub use features::CoreFeatures;
pub use plugin::{PluginLookup, PluginMeta, PluginScope};
pub use registry::ScopeRegistry;
pub use stream::StreamScope;

// ============================================================================
// LiveScope
// ============================================================================

/// The closed set of channel scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LiveScope {
    /// Core features built into the application.
    #[serde(rename = "grafana")]
    Grafana,
    /// Data source owned channels.
    #[serde(rename = "ds")]
    DataSource,
    /// Plugin owned channels.
    #[serde(rename = "plugin")]
    Plugin,
    /// Ad hoc streams declared by clients.
    #[serde(rename = "stream")]
    Stream,
}

impl LiveScope {
    /// All scopes in dispatch order.
    pub const ALL: [Self; 4] = [Self::Grafana, Self::DataSource, Self::Plugin, Self::Stream];

    /// Returns the scope's address name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Grafana => "grafana",
            Self::DataSource => "ds",
            Self::Plugin => "plugin",
            Self::Stream => "stream",
        }
    }
}

impl fmt::Display for LiveScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LiveScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "grafana" => Ok(Self::Grafana),
            "ds" => Ok(Self::DataSource),
            "plugin" => Ok(Self::Plugin),
            "stream" => Ok(Self::Stream),
            _ => Err(Error::InvalidScope),
        }
    }
}

// ============================================================================
// ChannelConfig
// ============================================================================

/// Transform applied to each received payload.
///
/// Returning `Ok(None)` drops the message; an error is recorded on the
/// channel status and the message is dropped.
pub type MessageProcessor = Arc<dyn Fn(Value) -> Result<Option<Value>> + Send + Sync>;

/// Resolved capabilities of a channel path.
///
/// Immutable once attached to a channel.
#[derive(Clone)]
pub struct ChannelConfig {
    /// Whether consumers may publish on the channel.
    pub supports_publish: bool,
    /// Whether the channel is subscribed at the transport.
    pub can_subscribe: bool,
    /// Human readable description.
    pub description: Option<String>,
    /// Optional payload transform.
    pub process_message: Option<MessageProcessor>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::subscribe_only()
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("supports_publish", &self.supports_publish)
            .field("can_subscribe", &self.can_subscribe)
            .field("description", &self.description)
            .field("process_message", &self.process_message.is_some())
            .finish()
    }
}

impl ChannelConfig {
    /// Subscribe-only channel.
    #[inline]
    #[must_use]
    pub const fn subscribe_only() -> Self {
        Self {
            supports_publish: false,
            can_subscribe: true,
            description: None,
            process_message: None,
        }
    }

    /// Channel that accepts publishes and is subscribed.
    #[inline]
    #[must_use]
    pub const fn publishable() -> Self {
        Self {
            supports_publish: true,
            can_subscribe: true,
            description: None,
            process_message: None,
        }
    }

    /// Sets the description.
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Disables the transport subscription (publish-only channel).
    #[inline]
    #[must_use]
    pub fn without_subscribe(mut self) -> Self {
        self.can_subscribe = false;
        self
    }

    /// Sets the payload transform.
    #[inline]
    #[must_use]
    pub fn with_processor<F>(mut self, processor: F) -> Self
    where
        F: Fn(Value) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        self.process_message = Some(Arc::new(processor));
        self
    }

    /// Runs the payload through the processor, if any.
    pub(crate) fn process(&self, data: Value) -> Result<Option<Value>> {
        match &self.process_message {
            Some(processor) => processor(data),
            None => Ok(Some(data)),
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Capability object for one namespace.
pub trait ChannelSupport: Send + Sync {
    /// Returns the config for a path, or `None` if the path is unknown.
    fn channel_config(&self, path: &str) -> Option<ChannelConfig>;
}

impl<F> ChannelSupport for F
where
    F: Fn(&str) -> Option<ChannelConfig> + Send + Sync,
{
    fn channel_config(&self, path: &str) -> Option<ChannelConfig> {
        self(path)
    }
}

/// Resolves namespaces of one scope to their channel support.
#[async_trait]
pub trait ScopeResolver: Send + Sync {
    /// Looks up the support object for a namespace.
    ///
    /// `Ok(None)` means the namespace exists but does not stream. Errors are
    /// lookup failures and are not memoized.
    async fn channel_support(&self, namespace: &str) -> Result<Option<Arc<dyn ChannelSupport>>>;

    /// Lists namespaces known to support streaming.
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_scope_parse() {
        assert_eq!("ds".parse::<LiveScope>().ok(), Some(LiveScope::DataSource));
        assert!(matches!(
            "unknown".parse::<LiveScope>(),
            Err(Error::InvalidScope)
        ));
        for scope in LiveScope::ALL {
            assert_eq!(scope.as_str().parse::<LiveScope>().ok(), Some(scope));
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = ChannelConfig::default();
        assert!(!config.supports_publish);
        assert!(config.can_subscribe);
        assert!(config.process_message.is_none());
    }

    #[test]
    fn test_config_processor() {
        let config = ChannelConfig::subscribe_only().with_processor(|v| {
            if v.is_null() {
                return Ok(None);
            }
            Ok(Some(json!({ "wrapped": v })))
        });

        assert_eq!(
            config.process(json!(1)).expect("processed"),
            Some(json!({ "wrapped": 1 }))
        );
        assert_eq!(config.process(Value::Null).expect("processed"), None);
        assert!(format!("{config:?}").contains("process_message: true"));
    }

    #[test]
    fn test_closure_support() {
        let support = |path: &str| (path == "room1").then(ChannelConfig::publishable);
        assert!(support.channel_config("room1").is_some());
        assert!(support.channel_config("room2").is_none());
    }
}
