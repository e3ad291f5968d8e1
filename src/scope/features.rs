//! Core features scope (`grafana`).
//!
//! Core features are registered in-process by the application at startup,
//! so resolution never leaves the process.

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
// Constants
// ============================================================================

/// Namespace of the broadcast feature.
pub const BROADCAST: &str = "broadcast";

/// Namespace of the test data feature.
pub const TESTDATA: &str = "testdata";

/// Paths served by the test data feature.
const TESTDATA_PATHS: &[(&str, &str)] = &[
    ("random-2s-stream", "Random stream with points every 2s"),
    ("random-flakey-stream", "Stream that returns data in random intervals"),
    ("random-20Hz-stream", "Random stream with points in 20Hz"),
];

// ============================================================================
// CoreFeatures
// ============================================================================

/// Resolver for the `grafana` scope.
#[derive(Default)]
pub struct CoreFeatures {
    features: RwLock<FxHashMap<String, Arc<dyn ChannelSupport>>>,
}

impl CoreFeatures {
    /// Creates an empty feature set.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a feature set with `broadcast` and `testdata` registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let features = Self::new();
        features.register(BROADCAST, Arc::new(BroadcastSupport));
        features.register(TESTDATA, Arc::new(TestDataSupport));
        features
    }

    /// Registers a feature under a namespace, replacing any previous one.
    pub fn register(&self, namespace: impl Into<String>, support: Arc<dyn ChannelSupport>) {
        let namespace = namespace.into();
        debug!(namespace = %namespace, "Registered core feature");
        self.features.write().insert(namespace, support);
    }

    /// Returns `true` if the namespace is registered.
    #[must_use]
    pub fn contains(&self, namespace: &str) -> bool {
        self.features.read().contains_key(namespace)
    }
}

#[async_trait]
impl ScopeResolver for CoreFeatures {
    async fn channel_support(&self, namespace: &str) -> Result<Option<Arc<dyn ChannelSupport>>> {
        Ok(self.features.read().get(namespace).cloned())
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let mut names: Vec<_> = self.features.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

// ============================================================================
// Built-in Features
// ============================================================================

/// Broadcasts any message to everyone on the same path.
struct BroadcastSupport;

impl ChannelSupport for BroadcastSupport {
    fn channel_config(&self, _path: &str) -> Option<ChannelConfig> {
        Some(ChannelConfig::publishable().with_description("Broadcast any messages to a channel"))
    }
}

/// Server generated test streams.
struct TestDataSupport;

impl ChannelSupport for TestDataSupport {
    fn channel_config(&self, path: &str) -> Option<ChannelConfig> {
        TESTDATA_PATHS
            .iter()
            .find(|(p, _)| *p == path)
            .map(|(_, description)| ChannelConfig::subscribe_only().with_description(*description))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults() {
        let features = CoreFeatures::with_defaults();

        let broadcast = features
            .channel_support(BROADCAST)
            .await
            .expect("lookup")
            .expect("registered");
        let config = broadcast.channel_config("any/room").expect("any path");
        assert!(config.supports_publish);

        let testdata = features
            .channel_support(TESTDATA)
            .await
            .expect("lookup")
            .expect("registered");
        assert!(testdata.channel_config("random-2s-stream").is_some());
        assert!(testdata.channel_config("nope").is_none());
        assert!(
            !testdata
                .channel_config("random-20Hz-stream")
                .expect("known")
                .supports_publish
        );
    }

    #[tokio::test]
    async fn test_unregistered_namespace() {
        let features = CoreFeatures::new();
        assert!(features.channel_support("dashboard").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let features = CoreFeatures::with_defaults();
        features.register(
            "dashboard",
            Arc::new(|_: &str| Some(ChannelConfig::subscribe_only())),
        );

        assert!(features.contains("dashboard"));
        let names = features.list_namespaces().await.expect("list");
        assert_eq!(names, vec!["broadcast", "dashboard", "testdata"]);
    }
}
