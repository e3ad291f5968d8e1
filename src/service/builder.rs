//! Builder pattern for multiplexer configuration.
//!
//! # Example
//!
//! ```no_run
//! use live_channels::{Multiplexer, WsProvider};
//!
//! # async fn example() -> live_channels::Result<()> {
//! let mux = Multiplexer::builder()
//!     .session_id("admin/18c4f1a2b3d/k2m9x7q1w3e5r")
//!     .app_url("https://grafana.example.com/")
//!     .start_with(WsProvider::default())?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::scope::{CoreFeatures, ScopeRegistry, StreamScope};
use crate::transport::{TransportContext, TransportLink, TransportProvider};

use super::core::Multiplexer;
use super::options::LiveOptions;

// ============================================================================
// Constants
// ============================================================================

/// Path of the live endpoint below the application root.
const LIVE_PATH: &str = "live/ws";

// ============================================================================
// MultiplexerBuilder
// ============================================================================

/// Builder for configuring a [`Multiplexer`].
///
/// Use [`Multiplexer::builder()`] to create a new builder.
#[derive(Default)]
pub struct MultiplexerBuilder {
    /// Opaque session id.
    session_id: Option<SessionId>,
    /// Explicit WebSocket endpoint.
    url: Option<String>,
    /// Application root the endpoint is derived from.
    app_url: Option<String>,
    /// Tuning options.
    options: LiveOptions,
    /// Scope resolvers.
    scopes: Option<Arc<ScopeRegistry>>,
}

// ============================================================================
// MultiplexerBuilder Implementation
// ============================================================================

impl MultiplexerBuilder {
    /// Creates a new builder with no configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the session id passed on connect.
    #[inline]
    #[must_use]
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(SessionId::new(session_id));
        self
    }

    /// Sets the session id from an existing [`SessionId`].
    #[inline]
    #[must_use]
    pub fn session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Sets the WebSocket endpoint directly (`ws://` or `wss://`).
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the application root (`http://` or `https://`).
    ///
    /// The endpoint becomes `ws(s)://<host>/<app path>/live/ws`. Ignored if
    /// [`url`](Self::url) is set.
    #[inline]
    #[must_use]
    pub fn app_url(mut self, app_url: impl Into<String>) -> Self {
        self.app_url = Some(app_url.into());
        self
    }

    /// Replaces the tuning options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: LiveOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the consumer linger.
    #[inline]
    #[must_use]
    pub fn linger(mut self, linger: Duration) -> Self {
        self.options.linger = linger;
        self
    }

    /// Sets the scope registry.
    ///
    /// Defaults to core features with `broadcast` and `testdata` plus an
    /// empty stream scope.
    #[inline]
    #[must_use]
    pub fn scopes(mut self, scopes: ScopeRegistry) -> Self {
        self.scopes = Some(Arc::new(scopes));
        self
    }

    /// Sets a scope registry shared with other owners.
    #[inline]
    #[must_use]
    pub fn shared_scopes(mut self, scopes: Arc<ScopeRegistry>) -> Self {
        self.scopes = Some(scopes);
        self
    }

    /// Validates the configuration and starts the multiplexer on a link.
    ///
    /// Sends `Connect` and spawns the event routing task, so it must be
    /// called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the session id or endpoint is missing
    /// - [`Error::Config`] if an option is out of range
    /// - [`Error::Url`] if a URL does not parse
    pub fn start(self, link: TransportLink) -> Result<Multiplexer> {
        let session_id = self.validate_session()?;
        let url = self.validate_url()?;
        self.options.validate()?;

        let scopes = self.scopes.unwrap_or_else(default_scopes);
        Multiplexer::start(session_id, url, self.options, scopes, link)
    }

    /// Spawns a transport context around `provider` and starts on it.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start).
    pub fn start_with<P: TransportProvider>(self, provider: P) -> Result<Multiplexer> {
        // Nothing is spawned for an invalid config.
        self.validate_session()?;
        self.validate_url()?;
        self.options.validate()?;

        self.start(TransportContext::spawn(provider))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl MultiplexerBuilder {
    /// Validates the session id.
    fn validate_session(&self) -> Result<SessionId> {
        let session_id = self.session_id.clone().ok_or_else(|| {
            Error::config(
                "Session id is required. Use .session_id() to set it.\n\
                 Example: Multiplexer::builder().session_id(SessionId::generate(\"admin\"))",
            )
        })?;

        if session_id.as_str().is_empty() {
            return Err(Error::config("Session id must not be empty"));
        }

        Ok(session_id)
    }

    /// Validates or derives the WebSocket endpoint.
    fn validate_url(&self) -> Result<Url> {
        if let Some(url) = &self.url {
            let url = Url::parse(url)?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(Error::config(format!(
                    "WebSocket URL must use ws:// or wss://, got: {url}"
                )));
            }
            return Ok(url);
        }

        match &self.app_url {
            Some(app_url) => live_url(app_url),
            None => Err(Error::config(
                "Endpoint is required. Use .url() or .app_url() to set it.\n\
                 Example: Multiplexer::builder().app_url(\"http://localhost:3000/\")",
            )),
        }
    }
}

/// Derives the live endpoint from an application root.
fn live_url(app_url: &str) -> Result<Url> {
    let mut url = Url::parse(app_url)?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(Error::config(format!(
                "Application URL must use http:// or https://, got: {other}"
            )));
        }
    };

    url.set_scheme(scheme)
        .map_err(|()| Error::config(format!("cannot use scheme {scheme} for {app_url}")))?;

    let path = format!("{}/{LIVE_PATH}", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

/// Registry used when none is configured.
fn default_scopes() -> Arc<ScopeRegistry> {
    Arc::new(ScopeRegistry::standard(
        Arc::new(CoreFeatures::with_defaults()),
        Arc::new(StreamScope::new()),
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = MultiplexerBuilder::new();
        assert!(builder.session_id.is_none());
        assert!(builder.url.is_none());
        assert!(builder.scopes.is_none());
    }

    #[test]
    fn test_live_url_from_app_root() {
        let url = live_url("http://localhost:3000/").expect("derive");
        assert_eq!(url.as_str(), "ws://localhost:3000/live/ws");

        let url = live_url("https://example.com/grafana/?orgId=1#x").expect("derive");
        assert_eq!(url.as_str(), "wss://example.com/grafana/live/ws");
    }

    #[test]
    fn test_live_url_rejects_other_schemes() {
        let err = live_url("ftp://example.com/").unwrap_err();
        assert!(err.to_string().contains("http"));
    }

    #[test]
    fn test_explicit_url_wins() {
        let builder = MultiplexerBuilder::new()
            .url("ws://localhost:9000/custom")
            .app_url("http://localhost:3000/");
        let url = builder.validate_url().expect("valid");
        assert_eq!(url.as_str(), "ws://localhost:9000/custom");
    }

    #[test]
    fn test_explicit_url_must_be_websocket() {
        let builder = MultiplexerBuilder::new().url("http://localhost:9000/");
        assert!(matches!(builder.validate_url(), Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_start_fails_without_session() {
        let (link, _remote) = TransportLink::loopback();
        let result = MultiplexerBuilder::new()
            .url("ws://localhost/live/ws")
            .start(link);

        let err = result.err().expect("missing session");
        assert!(err.to_string().contains("Session id"));
    }

    #[tokio::test]
    async fn test_start_fails_without_endpoint() {
        let (link, _remote) = TransportLink::loopback();
        let result = MultiplexerBuilder::new().session_id("s").start(link);

        let err = result.err().expect("missing endpoint");
        assert!(err.to_string().contains("Endpoint"));
    }

    #[tokio::test]
    async fn test_start_fails_with_zero_capacity() {
        let (link, _remote) = TransportLink::loopback();
        let result = MultiplexerBuilder::new()
            .session_id("s")
            .url("ws://localhost/live/ws")
            .options(LiveOptions::new().with_edge_capacity(0))
            .start(link);

        assert!(matches!(result, Err(Error::Config { .. })));
    }
}
