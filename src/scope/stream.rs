//! Ad hoc stream scope (`stream`).
//!
//! Clients declare stream configs locally; resolution never leaves the
//! process. The support returned for a namespace reads the declarations
//! live, so paths declared after the namespace was first resolved (and
//! memoized) are still found.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::Result;

use super::{ChannelConfig, ChannelSupport, ScopeResolver};

// ============================================================================
// Types
// ============================================================================

/// Declarations of one namespace.
#[derive(Default)]
struct Declarations {
    /// Config per exact path.
    paths: FxHashMap<String, ChannelConfig>,
    /// Config for any undeclared path.
    fallback: Option<ChannelConfig>,
}

type DeclarationMap = Arc<RwLock<FxHashMap<String, Declarations>>>;

// ============================================================================
// StreamScope
// ============================================================================

/// Resolver for the `stream` scope.
#[derive(Default)]
pub struct StreamScope {
    declared: DeclarationMap,
}

impl StreamScope {
    /// Creates a scope with no declarations.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the config of one path.
    pub fn declare(
        &self,
        namespace: impl Into<String>,
        path: impl Into<String>,
        config: ChannelConfig,
    ) {
        let (namespace, path) = (namespace.into(), path.into());
        debug!(namespace = %namespace, path = %path, "Declared stream");
        self.declared
            .write()
            .entry(namespace)
            .or_default()
            .paths
            .insert(path, config);
    }

    /// Declares the config used for every undeclared path of a namespace.
    pub fn declare_default(&self, namespace: impl Into<String>, config: ChannelConfig) {
        self.declared
            .write()
            .entry(namespace.into())
            .or_default()
            .fallback = Some(config);
    }

    /// Removes a declared path. Open channels keep their resolved config.
    pub fn retract(&self, namespace: &str, path: &str) -> bool {
        self.declared
            .write()
            .get_mut(namespace)
            .and_then(|decl| decl.paths.remove(path))
            .is_some()
    }
}

#[async_trait]
impl ScopeResolver for StreamScope {
    async fn channel_support(&self, namespace: &str) -> Result<Option<Arc<dyn ChannelSupport>>> {
        let support: Arc<dyn ChannelSupport> = Arc::new(StreamSupport {
            namespace: namespace.to_string(),
            declared: Arc::clone(&self.declared),
        });
        Ok(Some(support))
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let mut names: Vec<_> = self.declared.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

// ============================================================================
// StreamSupport
// ============================================================================

/// Live view over one namespace's declarations.
struct StreamSupport {
    namespace: String,
    declared: DeclarationMap,
}

impl ChannelSupport for StreamSupport {
    fn channel_config(&self, path: &str) -> Option<ChannelConfig> {
        let declared = self.declared.read();
        let decl = declared.get(&self.namespace)?;
        decl.paths.get(path).or(decl.fallback.as_ref()).cloned()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_declared_path() {
        let scope = StreamScope::new();
        scope.declare("app", "cpu", ChannelConfig::publishable());

        let support = scope
            .channel_support("app")
            .await
            .expect("lookup")
            .expect("always supported");
        assert!(support.channel_config("cpu").expect("declared").supports_publish);
        assert!(support.channel_config("mem").is_none());
    }

    #[tokio::test]
    async fn test_late_declaration_visible() {
        let scope = StreamScope::new();
        let support = scope
            .channel_support("app")
            .await
            .expect("lookup")
            .expect("always supported");
        assert!(support.channel_config("mem").is_none());

        scope.declare("app", "mem", ChannelConfig::subscribe_only());
        assert!(support.channel_config("mem").is_some());

        assert!(scope.retract("app", "mem"));
        assert!(support.channel_config("mem").is_none());
    }

    #[tokio::test]
    async fn test_fallback() {
        let scope = StreamScope::new();
        scope.declare_default("sensors", ChannelConfig::subscribe_only());
        scope.declare("sensors", "door", ChannelConfig::publishable());

        let support = scope
            .channel_support("sensors")
            .await
            .expect("lookup")
            .expect("always supported");
        assert!(!support.channel_config("anything").expect("fallback").supports_publish);
        assert!(support.channel_config("door").expect("declared").supports_publish);

        let names = scope.list_namespaces().await.expect("list");
        assert_eq!(names, vec!["sensors"]);
    }
}
