//! Plugin scope (`plugin`).
//!
//! The namespace is a plugin id. The plugin's metadata must be loaded before
//! it can tell which paths it streams.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};

use super::{ChannelSupport, ScopeResolver};

// ============================================================================
// PluginMeta
// ============================================================================

/// Metadata of a loaded plugin.
#[derive(Clone)]
pub struct PluginMeta {
    /// Plugin id (the channel namespace).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Streaming capability, if the plugin streams.
    pub channel_support: Option<Arc<dyn ChannelSupport>>,
}

impl fmt::Debug for PluginMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginMeta")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("streaming", &self.channel_support.is_some())
            .finish()
    }
}

// ============================================================================
// PluginLookup
// ============================================================================

/// Loader for plugin metadata.
#[async_trait]
pub trait PluginLookup: Send + Sync {
    /// Loads a plugin by id. `Ok(None)` if it is not installed.
    async fn load(&self, id: &str) -> Result<Option<PluginMeta>>;

    /// Lists installed plugins.
    async fn list(&self) -> Result<Vec<PluginMeta>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// PluginScope
// ============================================================================

/// Resolver for the `plugin` scope.
pub struct PluginScope {
    lookup: Arc<dyn PluginLookup>,
}

impl PluginScope {
    /// Creates the scope over a plugin loader.
    #[inline]
    #[must_use]
    pub fn new(lookup: Arc<dyn PluginLookup>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl ScopeResolver for PluginScope {
    async fn channel_support(&self, namespace: &str) -> Result<Option<Arc<dyn ChannelSupport>>> {
        let plugin = self
            .lookup
            .load(namespace)
            .await?
            .ok_or_else(|| Error::lookup(format!("unknown streaming plugin: {namespace}")))?;

        debug!(plugin = %plugin.id, streaming = plugin.channel_support.is_some(), "Loaded plugin");
        Ok(plugin.channel_support)
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let plugins = self.lookup.list().await?;
        Ok(plugins
            .into_iter()
            .filter(|p| p.channel_support.is_some())
            .map(|p| p.id)
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
