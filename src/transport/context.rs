//! Isolated transport context.
//!
//! The context is a spawned task that owns the provider (the single physical
//! connection) and the per-channel subscription objects. The orchestrator
//! talks to it only through a [`TransportLink`]: requests go in, events come
//! out. Nothing is shared between the two sides.
//!
//! # Event Loop
//!
//! ```text
//!  Request ──► handle_request ──► provider.{connect,subscribe,...}
//!                                        │
//!  Event   ◄── handle_provider_event ◄── ProviderEvent
//! ```
//!
//! Provider events for channels without a local subscription object are not
//! forwarded, which is what "releasing listeners" on unsubscribe means here.

// ============================================================================
// Imports
// ============================================================================

use std::future;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::identifiers::ChannelId;
use crate::protocol::{Event, Request};

use super::provider::{ProviderEvent, TransportProvider};

// ============================================================================
// TransportLink
// ============================================================================

/// Orchestrator side of the transport boundary.
///
/// Obtained from [`TransportContext::spawn`], or from
/// [`TransportLink::loopback`] when a test drives the other end by hand.
pub struct TransportLink {
    /// Requests to the transport context.
    pub(crate) requests: mpsc::UnboundedSender<Request>,
    /// Events from the transport context.
    pub(crate) events: mpsc::UnboundedReceiver<Event>,
    /// Transport task, if one was spawned.
    pub(crate) task: Option<JoinHandle<()>>,
}

impl TransportLink {
    /// Creates a link whose far end is a [`RemoteEnd`] instead of a task.
    #[must_use]
    pub fn loopback() -> (Self, RemoteEnd) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let link = Self {
            requests: request_tx,
            events: event_rx,
            task: None,
        };
        let remote = RemoteEnd {
            requests: request_rx,
            events: event_tx,
        };

        (link, remote)
    }
}

// ============================================================================
// RequestSink
// ============================================================================

/// Shared, closable sender half of a link.
///
/// Every channel handle holds a clone. Closing it drops the only sender,
/// which ends the transport context.
#[derive(Clone)]
pub(crate) struct RequestSink {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Request>>>>,
}

impl RequestSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Request>) -> Self {
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Sends a request. Returns `false` if the sink is closed.
    pub(crate) fn send(&self, request: Request) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(request).is_ok(),
            None => {
                trace!(request = request.name(), "Request sink closed, request dropped");
                false
            }
        }
    }

    /// Drops the sender.
    pub(crate) fn close(&self) {
        self.tx.lock().take();
    }
}

// ============================================================================
// RemoteEnd
// ============================================================================

/// Hand-driven far end of a loopback link.
pub struct RemoteEnd {
    requests: mpsc::UnboundedReceiver<Request>,
    events: mpsc::UnboundedSender<Event>,
}

impl RemoteEnd {
    /// Emits an event towards the orchestrator.
    ///
    /// Returns `false` if the orchestrator side is gone.
    pub fn emit(&self, event: Event) -> bool {
        self.events.send(event).is_ok()
    }

    /// Waits for the next request. `None` once the orchestrator hung up.
    pub async fn next_request(&mut self) -> Option<Request> {
        self.requests.recv().await
    }

    /// Returns the next queued request without waiting.
    pub fn try_next_request(&mut self) -> Option<Request> {
        self.requests.try_recv().ok()
    }

    /// Drains every queued request.
    pub fn drain_requests(&mut self) -> Vec<Request> {
        let mut drained = Vec::new();
        while let Ok(request) = self.requests.try_recv() {
            drained.push(request);
        }
        drained
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Local subscription object for one channel.
#[derive(Debug)]
struct Subscription {
    /// When the subscribe request was handled.
    created: Instant,
    /// Context of the last provider acknowledgement.
    acknowledged: Option<Value>,
    /// Publications forwarded.
    received: u64,
}

impl Subscription {
    fn new() -> Self {
        Self {
            created: Instant::now(),
            acknowledged: None,
            received: 0,
        }
    }
}

// ============================================================================
// TransportContext
// ============================================================================

/// Transport context task state.
pub struct TransportContext<P: TransportProvider> {
    /// The single provider connection.
    provider: P,
    /// Subscription objects by channel.
    subscriptions: FxHashMap<ChannelId, Subscription>,
    /// Events to the orchestrator.
    events: mpsc::UnboundedSender<Event>,
    /// Whether the last forwarded edge was `Connected`.
    connected: bool,
}

impl<P: TransportProvider> TransportContext<P> {
    /// Spawns the context on the current runtime and returns its link.
    ///
    /// The task ends when the link's request sender is dropped.
    pub fn spawn(provider: P) -> TransportLink {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let context = Self {
            provider,
            subscriptions: FxHashMap::default(),
            events: event_tx,
            connected: false,
        };
        let task = tokio::spawn(context.run(request_rx));

        TransportLink {
            requests: request_tx,
            events: event_rx,
            task: Some(task),
        }
    }

    /// Event loop: requests from the orchestrator, events from the provider.
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Request>) {
        let mut provider_events: Option<mpsc::UnboundedReceiver<ProviderEvent>> = None;

        loop {
            tokio::select! {
                request = requests.recv() => {
                    match request {
                        Some(request) => {
                            if let Some(rx) = self.handle_request(request, provider_events.is_some()).await {
                                provider_events = Some(rx);
                            }
                        }
                        None => {
                            debug!("Request channel closed");
                            break;
                        }
                    }
                }

                event = next_provider_event(&mut provider_events), if provider_events.is_some() => {
                    match event {
                        Some(event) => {
                            if !self.handle_provider_event(event) {
                                debug!("Orchestrator gone");
                                break;
                            }
                        }
                        None => {
                            debug!("Provider event stream ended");
                            provider_events = None;
                            self.forward_edge(false);
                        }
                    }
                }
            }
        }

        self.provider.close().await;
        debug!(
            subscriptions = self.subscriptions.len(),
            "Transport context terminated"
        );
    }

    /// Applies one request. Returns the provider event stream on connect.
    async fn handle_request(
        &mut self,
        request: Request,
        has_connection: bool,
    ) -> Option<mpsc::UnboundedReceiver<ProviderEvent>> {
        trace!(request = request.name(), id = ?request.channel_id(), "Request received");

        match request {
            Request::Connect { session_id, url } => {
                if has_connection {
                    warn!(url = %url, "Connection already open, ignoring connect");
                    return None;
                }
                match self.provider.connect(&session_id, &url).await {
                    Ok(rx) => {
                        info!(url = %url, "Transport connecting");
                        return Some(rx);
                    }
                    Err(e) => warn!(error = %e, url = %url, "Transport connect failed"),
                }
            }

            Request::Subscribe { id } => {
                if let Some(subscription) = self.subscriptions.get(&id) {
                    debug!(%id, acknowledged = subscription.acknowledged.is_some(), "Already subscribed");
                    // A pending acknowledgement still reaches the orchestrator.
                    if let Some(context) = subscription.acknowledged.clone() {
                        self.emit(Event::Subscribed { id, context });
                    }
                    return None;
                }
                self.subscriptions.insert(id.clone(), Subscription::new());
                if let Err(e) = self.provider.subscribe(id.as_str()).await {
                    warn!(%id, error = %e, "Subscribe failed");
                    self.subscriptions.remove(&id);
                    self.emit(Event::subscription_failed(id, e.to_string()));
                }
            }

            Request::Unsubscribe { id } => {
                let Some(subscription) = self.subscriptions.remove(&id) else {
                    trace!(%id, "Unsubscribe for unknown channel");
                    return None;
                };
                debug!(
                    %id,
                    received = subscription.received,
                    age_ms = subscription.created.elapsed().as_millis() as u64,
                    "Subscription released"
                );
                if let Err(e) = self.provider.unsubscribe(id.as_str()).await {
                    warn!(%id, error = %e, "Unsubscribe failed");
                }
            }

            Request::Publish { id, data } => {
                if let Err(e) = self.provider.publish(id.as_str(), data).await {
                    warn!(%id, error = %e, "Publish failed");
                }
            }
        }

        None
    }

    /// Translates a provider event. Returns `false` if the orchestrator is gone.
    fn handle_provider_event(&mut self, event: ProviderEvent) -> bool {
        match event {
            ProviderEvent::Connected => self.forward_edge(true),
            ProviderEvent::Disconnected { reason } => {
                debug!(reason = %reason, "Provider disconnected");
                self.forward_edge(false)
            }
            ProviderEvent::Subscribed { channel, context } => {
                let id = ChannelId::new(channel);
                match self.subscriptions.get_mut(&id) {
                    Some(subscription) => {
                        subscription.acknowledged = Some(context.clone());
                        self.emit(Event::Subscribed { id, context })
                    }
                    None => Self::dropped(&id, "subscribed"),
                }
            }
            ProviderEvent::SubscribeFailed { channel, context } => {
                let id = ChannelId::new(channel);
                if self.subscriptions.contains_key(&id) {
                    self.emit(Event::SubscriptionFailed { id, context })
                } else {
                    Self::dropped(&id, "subscriptionFailed")
                }
            }
            ProviderEvent::Unsubscribed { channel, context } => {
                let id = ChannelId::new(channel);
                match self.subscriptions.remove(&id) {
                    Some(subscription) => {
                        debug!(%id, acknowledged = subscription.acknowledged.is_some(), "Server ended subscription");
                        self.emit(Event::Unsubscribed { id, context })
                    }
                    None => Self::dropped(&id, "unsubscribed"),
                }
            }
            ProviderEvent::Publication { channel, context } => {
                let id = ChannelId::new(channel);
                match self.subscriptions.get_mut(&id) {
                    Some(subscription) => {
                        subscription.received += 1;
                        self.emit(Event::Received { id, context })
                    }
                    None => Self::dropped(&id, "received"),
                }
            }
        }
    }

    /// Forwards a connection edge if it differs from the last one.
    fn forward_edge(&mut self, connected: bool) -> bool {
        if self.connected == connected {
            return true;
        }
        self.connected = connected;
        self.emit(if connected {
            Event::Connected
        } else {
            Event::Disconnected
        })
    }

    fn emit(&self, event: Event) -> bool {
        self.events.send(event).is_ok()
    }

    fn dropped(id: &ChannelId, kind: &str) -> bool {
        trace!(%id, kind, "Provider event for released channel dropped");
        true
    }
}

/// Waits on the provider stream if there is one.
async fn next_provider_event(
    rx: &mut Option<mpsc::UnboundedReceiver<ProviderEvent>>,
) -> Option<ProviderEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

// ============================================================================
// Tests
// ============================================================================
