//! Scope dispatch table.
//!
//! Maps each [`LiveScope`] to its resolver and memoizes the channel support
//! per `(scope, namespace)`. A namespace is resolved through its resolver at
//! most once until [`ScopeRegistry::invalidate`] is called; lookups that
//! fail or find no support are not cached, so they are retried next time.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Error, Result};

use super::{ChannelSupport, CoreFeatures, LiveScope, ScopeResolver, StreamScope};

// ============================================================================
// Types
// ============================================================================

/// Memo slot for one namespace.
type SupportCell = Arc<OnceCell<Arc<dyn ChannelSupport>>>;

/// Why a memo slot stayed empty.
enum Miss {
    /// The namespace does not stream.
    Unsupported,
    /// The resolver failed.
    Failed(Error),
}

// ============================================================================
// ScopeRegistry
// ============================================================================

/// Dispatch table from scope to resolver, with per-namespace memoization.
///
/// # Example
///
/// ```ignore
/// let registry = ScopeRegistry::new()
///     .with_resolver(LiveScope::Grafana, Arc::new(CoreFeatures::with_defaults()))
///     .with_resolver(LiveScope::Stream, Arc::new(StreamScope::new()));
/// ```
#[derive(Default)]
pub struct ScopeRegistry {
    /// Resolver per scope.
    resolvers: FxHashMap<LiveScope, Arc<dyn ScopeResolver>>,
    /// Resolved supports per scope and namespace.
    cache: Mutex<FxHashMap<(LiveScope, String), SupportCell>>,
}

impl ScopeRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the in-process scopes registered.
    ///
    /// Data source and plugin scopes need external lookups and must be added
    /// with [`with_resolver`](Self::with_resolver).
    #[must_use]
    pub fn standard(core: Arc<CoreFeatures>, stream: Arc<StreamScope>) -> Self {
        Self::new()
            .with_resolver(LiveScope::Grafana, core)
            .with_resolver(LiveScope::Stream, stream)
    }

    /// Registers the resolver for a scope, replacing any previous one.
    #[must_use]
    pub fn with_resolver(mut self, scope: LiveScope, resolver: Arc<dyn ScopeResolver>) -> Self {
        self.resolvers.insert(scope, resolver);
        self.cache.get_mut().retain(|(s, _), _| *s != scope);
        self
    }

    /// Parses a scope name and checks a resolver is registered for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScope`] for unknown or unregistered scopes.
    pub fn resolve_scope(&self, name: &str) -> Result<LiveScope> {
        let scope: LiveScope = name.parse()?;
        if self.resolvers.contains_key(&scope) {
            Ok(scope)
        } else {
            Err(Error::InvalidScope)
        }
    }

    /// Returns `true` if a resolver is registered for the scope.
    #[inline]
    #[must_use]
    pub fn has_scope(&self, scope: LiveScope) -> bool {
        self.resolvers.contains_key(&scope)
    }

    /// Returns the channel support for a namespace, resolving it on first use.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidScope`] if the scope has no resolver
    /// - the resolver's error if the lookup failed
    pub async fn channel_support(
        &self,
        scope: LiveScope,
        namespace: &str,
    ) -> Result<Option<Arc<dyn ChannelSupport>>> {
        let resolver = self
            .resolvers
            .get(&scope)
            .cloned()
            .ok_or(Error::InvalidScope)?;

        let cell = {
            let mut cache = self.cache.lock();
            Arc::clone(cache.entry((scope, namespace.to_string())).or_default())
        };

        let resolved = cell
            .get_or_try_init(|| async {
                debug!(%scope, namespace, "Resolving channel support");
                match resolver.channel_support(namespace).await {
                    Ok(Some(support)) => Ok(support),
                    Ok(None) => Err(Miss::Unsupported),
                    Err(e) => Err(Miss::Failed(e)),
                }
            })
            .await;

        match resolved {
            Ok(support) => Ok(Some(Arc::clone(support))),
            Err(Miss::Unsupported) => Ok(None),
            Err(Miss::Failed(e)) => Err(e),
        }
    }

    /// Lists the namespaces a scope reports as streaming.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScope`] if the scope has no resolver.
    pub async fn list_namespaces(&self, scope: LiveScope) -> Result<Vec<String>> {
        let resolver = self
            .resolvers
            .get(&scope)
            .cloned()
            .ok_or(Error::InvalidScope)?;
        resolver.list_namespaces().await
    }

    /// Drops the memoized support of one namespace.
    pub fn invalidate(&self, scope: LiveScope, namespace: &str) {
        let removed = self
            .cache
            .lock()
            .remove(&(scope, namespace.to_string()))
            .is_some();
        if removed {
            debug!(%scope, namespace, "Invalidated channel support");
        }
    }

    /// Drops every memoized support.
    pub fn invalidate_all(&self) {
        let mut cache = self.cache.lock();
        let count = cache.len();
        cache.clear();
        debug!(count, "Invalidated all channel supports");
    }

    /// Returns the number of namespaces with a resolved support.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cache
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::scope::ChannelConfig;

    /// Resolver that counts lookups and supports namespaces starting with "live".
    #[derive(Default)]
    struct CountingResolver {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ScopeResolver for CountingResolver {
        async fn channel_support(
            &self,
            namespace: &str,
        ) -> Result<Option<Arc<dyn ChannelSupport>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if namespace == "broken" {
                return Err(Error::lookup("metadata unavailable"));
            }
            if !namespace.starts_with("live") {
                return Ok(None);
            }
            let support: Arc<dyn ChannelSupport> =
                Arc::new(|_: &str| Some(ChannelConfig::subscribe_only()));
            Ok(Some(support))
        }
    }

    fn registry_with(resolver: Arc<CountingResolver>) -> ScopeRegistry {
        ScopeRegistry::new().with_resolver(LiveScope::DataSource, resolver)
    }

    #[tokio::test]
    async fn test_support_memoized() {
        let resolver = Arc::new(CountingResolver::default());
        let registry = registry_with(Arc::clone(&resolver));

        for _ in 0..3 {
            let support = registry
                .channel_support(LiveScope::DataSource, "live-a")
                .await
                .expect("lookup");
            assert!(support.is_some());
        }

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.cached_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_resolve_once() {
        let resolver = Arc::new(CountingResolver::default());
        let registry = Arc::new(registry_with(Arc::clone(&resolver)));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry
                        .channel_support(LiveScope::DataSource, "live-b")
                        .await
                        .map(|s| s.is_some())
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.expect("join").expect("lookup"));
        }
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_misses_are_not_cached() {
        let resolver = Arc::new(CountingResolver::default());
        let registry = registry_with(Arc::clone(&resolver));

        assert!(
            registry
                .channel_support(LiveScope::DataSource, "static")
                .await
                .expect("lookup")
                .is_none()
        );
        assert!(
            registry
                .channel_support(LiveScope::DataSource, "broken")
                .await
                .is_err()
        );
        let _ = registry
            .channel_support(LiveScope::DataSource, "static")
            .await;

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
        assert_eq!(registry.cached_count(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_forces_lookup() {
        let resolver = Arc::new(CountingResolver::default());
        let registry = registry_with(Arc::clone(&resolver));

        let _ = registry.channel_support(LiveScope::DataSource, "live-c").await;
        registry.invalidate(LiveScope::DataSource, "live-c");
        let _ = registry.channel_support(LiveScope::DataSource, "live-c").await;
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);

        registry.invalidate_all();
        assert_eq!(registry.cached_count(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_scope() {
        let registry = ScopeRegistry::new();
        assert!(matches!(
            registry.resolve_scope("plugin"),
            Err(Error::InvalidScope)
        ));
        assert!(matches!(
            registry.resolve_scope("nope"),
            Err(Error::InvalidScope)
        ));
        assert!(matches!(
            registry.channel_support(LiveScope::Plugin, "x").await,
            Err(Error::InvalidScope)
        ));
    }
}
