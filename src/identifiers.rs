//! Type-safe identifiers for channels and sessions.
//!
//! Newtype wrappers keep channel keys and session strings from being mixed
//! with arbitrary text at compile time.
//!
//! | Type | Format |
//! |------|--------|
//! | [`ChannelAddress`] | `{scope, namespace, path}` |
//! | [`ChannelId`] | `scope/namespace/path` |
//! | [`SessionId`] | opaque, generated as `user/millis-hex/random` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ChannelAddress
// ============================================================================

/// Logical address of a channel, independent of any transport.
///
/// The scope is kept as text so that callers may pass names the registry
/// does not know; resolution reports those as `invalid scope`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelAddress {
    /// Scope name (`grafana`, `ds`, `plugin`, `stream`).
    pub scope: String,
    /// Scope-specific entity name.
    pub namespace: String,
    /// Path within the namespace. May contain `/`.
    pub path: String,
}

impl ChannelAddress {
    /// Creates a new address.
    #[inline]
    #[must_use]
    pub fn new(
        scope: impl Into<String>,
        namespace: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            scope: scope.into(),
            namespace: namespace.into(),
            path: path.into(),
        }
    }

    /// Returns the derived channel id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ChannelId {
        ChannelId::from_parts(&self.scope, &self.namespace, &self.path)
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.scope, self.namespace, self.path)
    }
}

// ============================================================================
// ChannelId
// ============================================================================

/// Deterministic channel key `scope/namespace/path`.
///
/// Used as the registry key and carried by every subscription request and
/// event crossing the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Builds an id from its three components.
    #[inline]
    #[must_use]
    pub fn from_parts(scope: &str, namespace: &str, path: &str) -> Self {
        Self(format!("{scope}/{namespace}/{path}"))
    }

    /// Wraps a raw id string received from the transport.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the id into an address.
    ///
    /// Returns `None` if the id has fewer than three segments. Everything
    /// after the second `/` belongs to the path, so this only recovers
    /// addresses whose scope and namespace contain no `/`.
    #[must_use]
    pub fn to_address(&self) -> Option<ChannelAddress> {
        let mut parts = self.0.splitn(3, '/');
        let scope = parts.next()?;
        let namespace = parts.next()?;
        let path = parts.next()?;
        Some(ChannelAddress::new(scope, namespace, path))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&ChannelAddress> for ChannelId {
    fn from(address: &ChannelAddress) -> Self {
        address.id()
    }
}

// ============================================================================
// SessionId
// ============================================================================

/// Opaque session identifier sent with the connect request.
///
/// The subsystem never interprets it; the caller owns its issuance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps a caller-supplied session string.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates `user/millis-hex/random` for the given user.
    #[must_use]
    pub fn generate(user: impl fmt::Display) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let random = Uuid::new_v4().simple().to_string();
        Self(format!("{user}/{millis:x}/{}", &random[..13]))
    }

    /// Returns the session id as a string slice.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_address_id() {
        let addr = ChannelAddress::new("grafana", "broadcast", "room1");
        assert_eq!(addr.id().as_str(), "grafana/broadcast/room1");
        assert_eq!(addr.to_string(), "grafana/broadcast/room1");
    }

    #[test]
    fn test_id_keeps_nested_path() {
        let id = ChannelId::new("ds/abc/metrics/cpu/total");
        let addr = id.to_address().expect("three segments");
        assert_eq!(addr.scope, "ds");
        assert_eq!(addr.namespace, "abc");
        assert_eq!(addr.path, "metrics/cpu/total");
    }

    #[test]
    fn test_id_too_short() {
        assert!(ChannelId::new("grafana/broadcast").to_address().is_none());
    }

    #[test]
    fn test_id_serializes_as_string() {
        let id = ChannelId::from_parts("stream", "app", "cpu");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"stream/app/cpu\"");
    }

    #[test]
    fn test_session_id_generate() {
        let session = SessionId::generate(42);
        let parts: Vec<_> = session.as_str().split('/').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "42");
        assert!(u128::from_str_radix(parts[1], 16).is_ok());
        assert_eq!(parts[2].len(), 13);
    }

    proptest! {
        #[test]
        fn prop_address_recovered_from_id(
            scope in "[a-z]{1,8}",
            namespace in "[a-zA-Z0-9_-]{1,12}",
            path in "[a-z0-9]{1,6}(/[a-z0-9]{1,6}){0,3}",
        ) {
            let addr = ChannelAddress::new(&scope, &namespace, &path);
            prop_assert_eq!(addr.id().to_address(), Some(addr));
        }
    }
}
