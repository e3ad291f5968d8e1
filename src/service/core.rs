//! Channel multiplexer.
//!
//! The [`Multiplexer`] is the single orchestrator-side service. It owns the
//! registry of open channels, resolves their configs through the scope
//! registry, drives the transport context and routes its events back to the
//! matching channel.
//!
//! # Example
//!
//! ```no_run
//! use futures_util::StreamExt;
//! use live_channels::{ChannelAddress, Multiplexer, TransportLink};
//!
//! # async fn example(link: TransportLink) -> live_channels::Result<()> {
//! let mux = Multiplexer::builder()
//!     .session_id("admin/18c4f1a2b3d/k2m9x7q1w3e5r")
//!     .url("ws://localhost:3000/live/ws")
//!     .start(link)?;
//!
//! let channel = mux.channel(ChannelAddress::new("grafana", "broadcast", "room1"));
//! let mut messages = channel.messages();
//! while let Some(message) = messages.next().await {
//!     println!("{message}");
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use futures_util::Stream;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{ChannelAddress, ChannelId, SessionId};
use crate::live::LiveChannel;
use crate::live::stream::changes;
use crate::protocol::event::{error_message, publication_data};
use crate::protocol::{Event, Request};
use crate::scope::{LiveScope, ScopeRegistry};
use crate::transport::TransportLink;
use crate::transport::context::RequestSink;

use super::builder::MultiplexerBuilder;
use super::options::LiveOptions;

// ============================================================================
// Types
// ============================================================================

/// Registry entry of one open channel.
struct OpenChannel {
    channel: LiveChannel,
    /// Config resolved and subscription wanted.
    resolved: bool,
    /// `Subscribe` sent for this instance.
    subscribed: bool,
}

/// State guarded by one lock so subscribe decisions and connection edges
/// are ordered.
struct RegistryState {
    channels: FxHashMap<ChannelId, OpenChannel>,
    connected: bool,
    /// Connection edges observed.
    edges: u64,
    /// Set by `shutdown`.
    closed: bool,
}

/// Internal shared state for the multiplexer.
pub(crate) struct MultiplexerInner {
    session_id: SessionId,
    url: Url,
    options: LiveOptions,
    scopes: Arc<ScopeRegistry>,
    requests: RequestSink,
    state: Mutex<RegistryState>,
    /// Connection edges for observers.
    edges: broadcast::Sender<bool>,
    router: Mutex<Option<JoinHandle<()>>>,
    transport: Mutex<Option<JoinHandle<()>>>,
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Shares one transport connection between many live channels.
///
/// Cloning is cheap; every clone drives the same registry.
#[derive(Clone)]
pub struct Multiplexer {
    inner: Arc<MultiplexerInner>,
}

// ============================================================================
// Multiplexer - Display
// ============================================================================

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Multiplexer")
            .field("session_id", &self.inner.session_id)
            .field("url", &self.inner.url.as_str())
            .field("connected", &state.connected)
            .field("channels", &state.channels.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Multiplexer - Constructor
// ============================================================================

impl Multiplexer {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> MultiplexerBuilder {
        MultiplexerBuilder::new()
    }

    /// Sends `Connect` and spawns the routing task.
    pub(crate) fn start(
        session_id: SessionId,
        url: Url,
        options: LiveOptions,
        scopes: Arc<ScopeRegistry>,
        link: TransportLink,
    ) -> Result<Self> {
        let TransportLink {
            requests,
            events,
            task,
        } = link;
        let requests = RequestSink::new(requests);
        let (edges, _) = broadcast::channel(options.edge_capacity);

        let connect = Request::Connect {
            session_id: session_id.clone(),
            url: url.to_string(),
        };
        if !requests.send(connect) {
            return Err(Error::TransportClosed);
        }

        let inner = Arc::new(MultiplexerInner {
            session_id,
            url,
            options,
            scopes,
            requests,
            state: Mutex::new(RegistryState {
                channels: FxHashMap::default(),
                connected: false,
                edges: 0,
                closed: false,
            }),
            edges,
            router: Mutex::new(None),
            transport: Mutex::new(task),
        });

        let router = tokio::spawn(route_events(Arc::downgrade(&inner), events));
        *inner.router.lock() = Some(router);

        info!(session_id = %inner.session_id, url = %inner.url, "Multiplexer started");

        Ok(Self { inner })
    }
}

// ============================================================================
// Multiplexer - Accessors
// ============================================================================

impl Multiplexer {
    /// Returns the session id.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    /// Returns the WebSocket endpoint.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Returns the scope registry.
    #[inline]
    #[must_use]
    pub fn scopes(&self) -> &Arc<ScopeRegistry> {
        &self.inner.scopes
    }

    /// Returns `true` while the physical connection is established.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }

    /// Returns the number of connection edges observed.
    #[inline]
    #[must_use]
    pub fn connection_edges(&self) -> u64 {
        self.inner.state.lock().edges
    }

    /// Returns the ids of every open channel, sorted.
    #[must_use]
    pub fn open_channels(&self) -> Vec<ChannelId> {
        let mut ids: Vec<_> = self.inner.state.lock().channels.keys().cloned().collect();
        ids.sort();
        ids
    }
}

// ============================================================================
// Multiplexer - Channels
// ============================================================================

impl Multiplexer {
    /// Returns the open channel for an address, creating it if needed.
    ///
    /// Repeated calls return the same instance while it is open. A new
    /// channel starts `Pending` and resolves in the background; resolution
    /// failures show up as an `Invalid` status, never as an error here.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn channel(&self, address: ChannelAddress) -> LiveChannel {
        let settings = self.inner.options.channel_settings();

        let scope = match self.inner.scopes.resolve_scope(&address.scope) {
            Ok(scope) => scope,
            Err(e) => {
                let channel = LiveChannel::new(address, self.inner.requests.clone(), settings);
                channel.fail(e.to_string());
                return channel;
            }
        };

        // Ids join the parts with '/', so the namespace must not contain one.
        if address.namespace.contains('/') {
            let error = format!("invalid namespace: {}", address.namespace);
            let channel = LiveChannel::new(address, self.inner.requests.clone(), settings);
            channel.fail(error);
            return channel;
        }

        let id = address.id();
        let channel = {
            let mut state = self.inner.state.lock();

            if state.closed {
                drop(state);
                let channel = LiveChannel::new(address, self.inner.requests.clone(), settings);
                channel.fail("multiplexer is shut down");
                return channel;
            }

            if let Some(open) = state.channels.get(&id) {
                if !open.channel.state().is_terminal() {
                    return open.channel.clone();
                }
                // Terminal but its hook has not run yet; release it here so
                // the unsubscribe precedes the new subscribe.
                if let Some(stale) = state.channels.remove(&id) {
                    debug!(%id, subscribed = stale.subscribed, "Stale channel released");
                    if stale.subscribed {
                        self.inner.requests.send(Request::Unsubscribe { id: id.clone() });
                    }
                }
            }

            let channel = LiveChannel::new(address, self.inner.requests.clone(), settings);
            let registry = Arc::downgrade(&self.inner);
            channel.set_shutdown_hook(Box::new(move |channel| {
                if let Some(inner) = registry.upgrade() {
                    inner.release(channel);
                }
            }));

            state.channels.insert(
                id,
                OpenChannel {
                    channel: channel.clone(),
                    resolved: false,
                    subscribed: false,
                },
            );
            channel
        };

        debug!(id = %channel.id(), "Channel opened");
        tokio::spawn(initialize(Arc::clone(&self.inner), scope, channel.clone()));
        channel
    }

    /// Streams the connection state: the current value, then every edge.
    ///
    /// Never yields the same value twice in a row.
    pub fn connection_state(&self) -> impl Stream<Item = bool> + Send + 'static {
        let (current, receiver) = {
            let state = self.inner.state.lock();
            (state.connected, self.inner.edges.subscribe())
        };
        changes(current, receiver)
    }

    /// Shuts every channel down and closes the transport.
    ///
    /// Waits for the transport context to close its provider. Channels
    /// requested afterwards are returned `Invalid`.
    pub async fn shutdown(&self) {
        let channels: Vec<_> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.channels.values().map(|open| open.channel.clone()).collect()
        };

        info!(channels = channels.len(), "Multiplexer shutting down");
        for channel in channels {
            channel.shutdown();
        }

        self.inner.requests.close();

        let router = self.inner.router.lock().take();
        if let Some(router) = router {
            router.abort();
        }

        let transport = self.inner.transport.lock().take();
        if let Some(task) = transport
            && let Err(e) = task.await
        {
            warn!(error = %e, "Transport task failed");
        }

        debug!("Multiplexer shut down");
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Resolves a channel's config and issues its subscription.
async fn initialize(inner: Arc<MultiplexerInner>, scope: LiveScope, channel: LiveChannel) {
    let address = channel.address();

    let support = match inner.scopes.channel_support(scope, &address.namespace).await {
        Ok(Some(support)) => support,
        Ok(None) => {
            channel.fail(Error::streaming_not_supported(&address.namespace).to_string());
            return;
        }
        Err(e) => {
            channel.fail(e.to_string());
            return;
        }
    };

    let Some(config) = support.channel_config(&address.path) else {
        channel.fail(Error::unknown_path(&address.path).to_string());
        return;
    };

    let subscribes = config.can_subscribe;
    if !channel.initialize(config) {
        trace!(id = %channel.id(), "Channel closed during resolution");
        return;
    }
    if !subscribes {
        debug!(id = %channel.id(), "Publish-only channel ready");
        return;
    }

    let mut state = inner.state.lock();
    let connected = state.connected;
    let Some(open) = state.channels.get_mut(channel.id()) else {
        return;
    };
    if !open.channel.ptr_eq(&channel) {
        return;
    }

    open.resolved = true;
    if connected {
        open.subscribed = true;
        inner.requests.send(Request::Subscribe {
            id: channel.id().clone(),
        });
    } else {
        debug!(id = %channel.id(), "Not connected, subscription deferred");
    }
}

// ============================================================================
// Event Routing
// ============================================================================

/// Routes transport events until the link or the multiplexer is gone.
async fn route_events(registry: Weak<MultiplexerInner>, mut events: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = registry.upgrade() else {
            break;
        };
        inner.dispatch(event);
    }
    debug!("Event routing terminated");
}

impl MultiplexerInner {
    /// Applies one transport event.
    fn dispatch(&self, event: Event) {
        match event {
            Event::Connected => self.on_connection_edge(true),

            Event::Disconnected => self.on_connection_edge(false),

            Event::Subscribed { id, .. } => {
                if let Some(channel) = self.lookup(&id) {
                    channel.on_subscribed();
                }
            }

            Event::SubscriptionFailed { id, context } => {
                if let Some(channel) = self.lookup(&id) {
                    channel.on_subscription_failed(error_message(&context));
                }
            }

            Event::Unsubscribed { id, .. } => {
                let channel = {
                    let mut state = self.state.lock();
                    state.channels.get_mut(&id).map(|open| {
                        // The server already dropped it; no unsubscribe on release.
                        open.subscribed = false;
                        open.channel.clone()
                    })
                };
                match channel {
                    Some(channel) => {
                        debug!(id = %id, "Unsubscribed by server");
                        channel.shutdown();
                    }
                    None => trace!(id = %id, "Unsubscribed event for unknown channel"),
                }
            }

            Event::Received { id, context } => {
                if let Some(channel) = self.lookup(&id) {
                    channel.on_message(publication_data(context));
                }
            }
        }
    }

    /// Returns the open channel for an id.
    fn lookup(&self, id: &ChannelId) -> Option<LiveChannel> {
        let channel = self
            .state
            .lock()
            .channels
            .get(id)
            .map(|open| open.channel.clone());
        if channel.is_none() {
            trace!(id = %id, "Event for unknown channel dropped");
        }
        channel
    }

    /// Records a connection edge and fans it out.
    fn on_connection_edge(&self, connected: bool) {
        let channels: Vec<_> = {
            let mut state = self.state.lock();
            if state.connected == connected {
                trace!(connected, "Repeated connection edge ignored");
                return;
            }
            state.connected = connected;
            state.edges += 1;
            // No observers is not an error.
            let _ = self.edges.send(connected);

            if connected {
                for (id, open) in &mut state.channels {
                    if open.resolved && !open.subscribed {
                        open.subscribed = true;
                        self.requests.send(Request::Subscribe { id: id.clone() });
                    }
                }
            }

            state.channels.values().map(|open| open.channel.clone()).collect()
        };

        info!(connected, channels = channels.len(), "Connection state changed");
        for channel in channels {
            channel.on_connection_edge(connected);
        }
    }

    /// Removes a terminal channel and unsubscribes it.
    fn release(&self, channel: &LiveChannel) {
        let subscribed = {
            let mut state = self.state.lock();
            match state.channels.get(channel.id()) {
                Some(open) if open.channel.ptr_eq(channel) => state
                    .channels
                    .remove(channel.id())
                    .is_some_and(|open| open.subscribed),
                _ => return,
            }
        };

        debug!(id = %channel.id(), subscribed, "Channel released");
        if subscribed {
            self.requests.send(Request::Unsubscribe {
                id: channel.id().clone(),
            });
        }
    }
}

impl Drop for MultiplexerInner {
    fn drop(&mut self) {
        self.requests.close();
        if let Some(router) = self.router.get_mut().take() {
            router.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use futures_util::StreamExt;
    use proptest::prelude::*;
    use serde_json::{Value, json};
    use tokio::time::timeout;

    use crate::live::{ChannelState, ChannelStatus};
    use crate::scope::{
        ChannelConfig, CoreFeatures, DataSourceLookup, DataSourceMeta, DataSourceScope,
        StreamScope,
    };
    use crate::transport::RemoteEnd;

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        mux: Multiplexer,
        remote: RemoteEnd,
        core: Arc<CoreFeatures>,
        streams: Arc<StreamScope>,
    }

    impl Harness {
        fn start() -> Self {
            Self::start_with(|registry| registry)
        }

        fn start_with(extend: impl FnOnce(ScopeRegistry) -> ScopeRegistry) -> Self {
            let core = Arc::new(CoreFeatures::with_defaults());
            let streams = Arc::new(StreamScope::new());
            let registry = extend(ScopeRegistry::standard(
                Arc::clone(&core),
                Arc::clone(&streams),
            ));

            let (link, mut remote) = TransportLink::loopback();
            let mux = Multiplexer::builder()
                .session_id("admin/18c4f1a2b3d/k2m9x7q1w3e5r")
                .url("ws://localhost:3000/live/ws")
                .linger(Duration::ZERO)
                .scopes(registry)
                .start(link)
                .expect("start");

            assert!(matches!(
                remote.try_next_request(),
                Some(Request::Connect { .. })
            ));

            Self {
                mux,
                remote,
                core,
                streams,
            }
        }

        fn emit(&self, event: Event) {
            assert!(self.remote.emit(event));
        }

        async fn next_request(&mut self) -> Request {
            timeout(WAIT, self.remote.next_request())
                .await
                .expect("request in time")
                .expect("request")
        }

        async fn connect(&mut self) {
            self.emit(Event::Connected);
            wait_until(|| self.mux.is_connected()).await;
        }
    }

    fn address(scope: &str, namespace: &str, path: &str) -> ChannelAddress {
        ChannelAddress::new(scope, namespace, path)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(WAIT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition in time");
    }

    async fn wait_for_state(channel: &LiveChannel, state: ChannelState) -> ChannelStatus {
        let mut statuses = Box::pin(channel.status_stream());
        timeout(WAIT, async {
            while let Some(status) = statuses.next().await {
                if status.state == state {
                    return status;
                }
            }
            panic!("status stream ended before {state}");
        })
        .await
        .expect("state in time")
    }

    #[tokio::test]
    async fn test_same_handle_while_open() {
        let h = Harness::start();
        let a = h.mux.channel(address("grafana", "broadcast", "room1"));
        let b = h.mux.channel(address("grafana", "broadcast", "room1"));
        let other = h.mux.channel(address("grafana", "broadcast", "room2"));

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&other));
        assert_eq!(h.mux.open_channels().len(), 2);
    }

    #[tokio::test]
    async fn test_new_instance_after_shutdown() {
        let h = Harness::start();
        let addr = address("grafana", "broadcast", "room1");

        let first = h.mux.channel(addr.clone());
        first.shutdown();
        assert!(h.mux.open_channels().is_empty());

        let second = h.mux.channel(addr);
        assert!(!first.ptr_eq(&second));
        assert_eq!(second.state(), ChannelState::Pending);
    }

    #[tokio::test]
    async fn test_reopen_before_release_unsubscribes_first() {
        let mut h = Harness::start();
        h.connect().await;
        let addr = address("grafana", "broadcast", "room1");

        let first = h.mux.channel(addr.clone());
        let id = first.id().clone();
        assert_eq!(h.next_request().await, Request::Subscribe { id: id.clone() });

        // Hold the release back: terminal, still registered.
        first.set_shutdown_hook(Box::new(|_| {}));
        first.shutdown();
        assert_eq!(h.mux.open_channels(), vec![id.clone()]);

        let second = h.mux.channel(addr);
        assert!(!first.ptr_eq(&second));
        assert_eq!(h.next_request().await, Request::Unsubscribe { id: id.clone() });
        assert_eq!(h.next_request().await, Request::Subscribe { id: id.clone() });

        // The late release leaves the new instance alone.
        h.mux.inner.release(&first);
        assert_eq!(h.mux.open_channels(), vec![id.clone()]);
        assert!(h.remote.try_next_request().is_none());

        h.emit(Event::Subscribed {
            id,
            context: Value::Null,
        });
        wait_for_state(&second, ChannelState::Connected).await;
    }

    #[tokio::test]
    async fn test_new_instance_after_invalid() {
        let h = Harness::start();
        let addr = address("grafana", "broadcast-nope", "room1");

        let first = h.mux.channel(addr.clone());
        let status = wait_for_state(&first, ChannelState::Invalid).await;
        assert_eq!(
            status.error.as_deref(),
            Some("broadcast-nope does not support streaming")
        );
        wait_until(|| h.mux.open_channels().is_empty()).await;

        let second = h.mux.channel(addr);
        assert!(!first.ptr_eq(&second));
        assert_eq!(second.state(), ChannelState::Pending);
    }

    #[tokio::test]
    async fn test_unknown_scope_is_invalid() {
        let h = Harness::start();
        let channel = h.mux.channel(address("nope", "x", "y"));

        let status = channel.status();
        assert_eq!(status.state, ChannelState::Invalid);
        assert_eq!(status.error.as_deref(), Some("invalid scope"));
        assert!(h.mux.open_channels().is_empty());
    }

    #[tokio::test]
    async fn test_namespace_with_separator_is_invalid() {
        let h = Harness::start();
        let nested = h.mux.channel(address("grafana", "broadcast/x", "c"));
        let plain = h.mux.channel(address("grafana", "broadcast", "x/c"));

        let status = nested.status();
        assert_eq!(status.state, ChannelState::Invalid);
        assert_eq!(status.error.as_deref(), Some("invalid namespace: broadcast/x"));
        assert_eq!(h.mux.open_channels(), vec![plain.id().clone()]);
        assert_eq!(plain.address(), &address("grafana", "broadcast", "x/c"));
    }

    #[tokio::test]
    async fn test_unknown_path_is_invalid() {
        let h = Harness::start();
        let channel = h.mux.channel(address("grafana", "testdata", "random-1Hz"));

        let status = wait_for_state(&channel, ChannelState::Invalid).await;
        assert_eq!(status.error.as_deref(), Some("unknown path: random-1Hz"));
    }

    #[tokio::test]
    async fn test_lookup_error_is_invalid() {
        struct Offline;

        #[async_trait::async_trait]
        impl DataSourceLookup for Offline {
            async fn get(&self, _uid: &str) -> Result<Option<DataSourceMeta>> {
                Err(Error::lookup("metadata service unavailable"))
            }
        }

        let h = Harness::start_with(|registry| {
            registry.with_resolver(
                LiveScope::DataSource,
                Arc::new(DataSourceScope::new(Arc::new(Offline))),
            )
        });
        let channel = h.mux.channel(address("ds", "abc123", "metrics"));

        let status = wait_for_state(&channel, ChannelState::Invalid).await;
        assert_eq!(status.error.as_deref(), Some("metadata service unavailable"));
    }

    #[tokio::test]
    async fn test_subscribe_deferred_until_connected() {
        let mut h = Harness::start();
        let channel = h.mux.channel(address("grafana", "broadcast", "room1"));

        wait_for_state(&channel, ChannelState::Connecting).await;
        tokio::task::yield_now().await;
        assert!(h.remote.try_next_request().is_none());

        h.emit(Event::Connected);
        assert_eq!(
            h.next_request().await,
            Request::Subscribe {
                id: ChannelId::new("grafana/broadcast/room1"),
            }
        );
    }

    #[tokio::test]
    async fn test_lifecycle_through_reconnect() {
        let mut h = Harness::start();
        h.connect().await;

        let channel = h.mux.channel(address("grafana", "broadcast", "room1"));
        let id = channel.id().clone();
        assert_eq!(h.next_request().await, Request::Subscribe { id: id.clone() });

        h.emit(Event::Subscribed {
            id: id.clone(),
            context: Value::Null,
        });
        wait_for_state(&channel, ChannelState::Connected).await;

        h.emit(Event::Disconnected);
        wait_for_state(&channel, ChannelState::Disconnected).await;

        h.emit(Event::Connected);
        wait_for_state(&channel, ChannelState::Connecting).await;
        // Already issued; the provider resubscribes on its own.
        tokio::task::yield_now().await;
        assert!(h.remote.try_next_request().is_none());

        h.emit(Event::Subscribed {
            id,
            context: Value::Null,
        });
        wait_for_state(&channel, ChannelState::Connected).await;
    }

    #[tokio::test]
    async fn test_events_routed_by_id() {
        let mut h = Harness::start();
        h.connect().await;

        let a = h.mux.channel(address("grafana", "broadcast", "a"));
        let b = h.mux.channel(address("grafana", "broadcast", "b"));
        let mut a_messages = a.messages();
        let mut b_messages = b.messages();
        h.next_request().await;
        h.next_request().await;

        h.emit(Event::received(ChannelId::new("grafana/broadcast/zzz"), json!(0)));
        h.emit(Event::received(a.id().clone(), json!({ "n": 1 })));
        h.emit(Event::received(b.id().clone(), json!({ "n": 2 })));

        let a_first = timeout(WAIT, a_messages.next()).await.expect("a in time");
        let b_first = timeout(WAIT, b_messages.next()).await.expect("b in time");
        assert_eq!(a_first, Some(json!({ "n": 1 })));
        assert_eq!(b_first, Some(json!({ "n": 2 })));
    }

    #[tokio::test]
    async fn test_no_messages_after_unsubscribe() {
        let mut h = Harness::start();
        h.connect().await;

        let channel = h.mux.channel(address("grafana", "broadcast", "room1"));
        let id = channel.id().clone();
        let mut messages = channel.messages();
        assert_eq!(h.next_request().await, Request::Subscribe { id: id.clone() });

        channel.shutdown();
        assert_eq!(h.next_request().await, Request::Unsubscribe { id: id.clone() });

        h.emit(Event::received(id, json!("late")));
        assert_eq!(timeout(WAIT, messages.next()).await.expect("ended"), None);
        assert!(h.mux.open_channels().is_empty());
    }

    #[tokio::test]
    async fn test_last_consumer_unsubscribes() {
        let mut h = Harness::start();
        h.connect().await;

        let channel = h.mux.channel(address("grafana", "broadcast", "room1"));
        let messages = channel.messages();
        h.next_request().await;

        drop(messages);
        assert_eq!(channel.state(), ChannelState::Shutdown);
        assert_eq!(
            h.next_request().await,
            Request::Unsubscribe {
                id: channel.id().clone(),
            }
        );
    }

    #[tokio::test]
    async fn test_subscription_failure_keeps_channel() {
        let mut h = Harness::start();
        h.connect().await;

        let channel = h.mux.channel(address("grafana", "broadcast", "room1"));
        h.next_request().await;

        h.emit(Event::subscription_failed(
            channel.id().clone(),
            "permission denied",
        ));
        wait_until(|| channel.status().error.is_some()).await;

        let status = channel.status();
        assert_eq!(status.state, ChannelState::Connecting);
        assert_eq!(status.error.as_deref(), Some("permission denied"));
        assert_eq!(h.mux.open_channels(), vec![channel.id().clone()]);
    }

    #[tokio::test]
    async fn test_server_unsubscribe_shuts_down() {
        let mut h = Harness::start();
        h.connect().await;

        let channel = h.mux.channel(address("grafana", "broadcast", "room1"));
        h.next_request().await;

        h.emit(Event::Unsubscribed {
            id: channel.id().clone(),
            context: Value::Null,
        });
        wait_for_state(&channel, ChannelState::Shutdown).await;
        assert!(h.mux.open_channels().is_empty());

        tokio::task::yield_now().await;
        assert!(h.remote.try_next_request().is_none());
    }

    #[tokio::test]
    async fn test_publish_not_supported_stays_local() {
        let mut h = Harness::start();
        h.core.register(
            "broadcast",
            Arc::new(|_: &str| Some(ChannelConfig::subscribe_only())),
        );
        h.connect().await;

        let channel = h.mux.channel(address("grafana", "broadcast", "room1"));
        wait_for_state(&channel, ChannelState::Connecting).await;
        h.next_request().await;

        let result = channel.publish(json!({ "text": "hi" }));
        assert!(matches!(result, Err(Error::PublishNotSupported { .. })));

        tokio::task::yield_now().await;
        assert!(h.remote.drain_requests().is_empty());
    }

    #[tokio::test]
    async fn test_publish_forwarded() {
        let mut h = Harness::start();
        h.connect().await;

        let channel = h.mux.channel(address("grafana", "broadcast", "room1"));
        wait_for_state(&channel, ChannelState::Connecting).await;
        h.next_request().await;

        channel.publish(json!({ "text": "hi" })).expect("publish");
        assert_eq!(
            h.next_request().await,
            Request::Publish {
                id: channel.id().clone(),
                data: json!({ "text": "hi" }),
            }
        );
    }

    #[tokio::test]
    async fn test_stream_scope_publish_only() {
        let mut h = Harness::start();
        h.streams
            .declare("app", "events", ChannelConfig::publishable().without_subscribe());
        h.connect().await;

        let channel = h.mux.channel(address("stream", "app", "events"));
        wait_for_state(&channel, ChannelState::Connected).await;

        channel.publish(json!(1)).expect("publish");
        assert!(matches!(h.next_request().await, Request::Publish { .. }));
    }

    #[tokio::test]
    async fn test_connection_state_stream() {
        let h = Harness::start();
        let mut states = Box::pin(h.mux.connection_state());
        assert_eq!(states.next().await, Some(false));

        h.emit(Event::Connected);
        h.emit(Event::Connected);
        h.emit(Event::Disconnected);
        h.emit(Event::Connected);

        let seen: Vec<bool> = timeout(WAIT, states.take(3).collect())
            .await
            .expect("edges in time");
        assert_eq!(seen, vec![true, false, true]);
        assert_eq!(h.mux.connection_edges(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let mut h = Harness::start();
        h.connect().await;

        let channel = h.mux.channel(address("grafana", "broadcast", "room1"));
        h.next_request().await;

        h.mux.shutdown().await;
        assert_eq!(channel.state(), ChannelState::Shutdown);
        assert_eq!(
            h.next_request().await,
            Request::Unsubscribe {
                id: channel.id().clone(),
            }
        );
        assert!(
            timeout(WAIT, h.remote.next_request())
                .await
                .expect("closed in time")
                .is_none()
        );

        let late = h.mux.channel(address("grafana", "broadcast", "room1"));
        assert_eq!(late.state(), ChannelState::Invalid);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_connection_state_has_no_repeats(edges in prop::collection::vec(any::<bool>(), 0..24)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");

            let (seen, expected) = runtime.block_on(async {
                let h = Harness::start();
                let states = h.mux.connection_state();

                let mut expected = vec![false];
                for connected in &edges {
                    if expected.last() != Some(connected) {
                        expected.push(*connected);
                    }
                    h.emit(if *connected { Event::Connected } else { Event::Disconnected });
                }

                let seen: Vec<bool> = timeout(WAIT, states.take(expected.len()).collect())
                    .await
                    .expect("edges in time");
                (seen, expected)
            });

            prop_assert!(seen.windows(2).all(|pair| pair[0] != pair[1]));
            prop_assert_eq!(seen, expected);
        }
    }
}
