//! Data source scope (`ds`).
//!
//! The namespace is a data source uid. Whether it streams, and which paths it
//! serves, is decided by the data source's own metadata, fetched through an
//! injected [`DataSourceLookup`].

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
// DataSourceMeta
// ============================================================================

/// Metadata of one data source instance.
#[derive(Clone)]
pub struct DataSourceMeta {
    /// Data source uid (the channel namespace).
    pub uid: String,
    /// Display name.
    pub name: String,
    /// Streaming capability, if the data source streams.
    pub channel_support: Option<Arc<dyn ChannelSupport>>,
}

impl fmt::Debug for DataSourceMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSourceMeta")
            .field("uid", &self.uid)
            .field("name", &self.name)
            .field("streaming", &self.channel_support.is_some())
            .finish()
    }
}

// ============================================================================
// DataSourceLookup
// ============================================================================

/// Source of data source metadata.
///
/// Implemented by the embedding application, typically over its HTTP API.
#[async_trait]
pub trait DataSourceLookup: Send + Sync {
    /// Fetches a data source by uid. `Ok(None)` if it does not exist.
    async fn get(&self, uid: &str) -> Result<Option<DataSourceMeta>>;

    /// Lists all data sources.
    async fn list(&self) -> Result<Vec<DataSourceMeta>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// DataSourceScope
// ============================================================================

/// Resolver for the `ds` scope.
pub struct DataSourceScope {
    lookup: Arc<dyn DataSourceLookup>,
}

impl DataSourceScope {
    /// Creates the scope over a metadata lookup.
    #[inline]
    #[must_use]
    pub fn new(lookup: Arc<dyn DataSourceLookup>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl ScopeResolver for DataSourceScope {
    async fn channel_support(&self, namespace: &str) -> Result<Option<Arc<dyn ChannelSupport>>> {
        let meta = self
            .lookup
            .get(namespace)
            .await?
            .ok_or_else(|| Error::lookup(format!("data source not found: {namespace}")))?;

        debug!(uid = %meta.uid, streaming = meta.channel_support.is_some(), "Loaded data source");
        Ok(meta.channel_support)
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let sources = self.lookup.list().await?;
        Ok(sources
            .into_iter()
            .filter(|ds| ds.channel_support.is_some())
            .map(|ds| ds.uid)
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
