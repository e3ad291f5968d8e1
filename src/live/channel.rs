//! Live channel handle and state machine.
//!
//! A [`LiveChannel`] is created by the
//! [`Multiplexer`](crate::service::Multiplexer) and shared with every
//! consumer of the same address. The multiplexer drives its transitions from
//! resolution results and transport events; consumers observe it.
//!
//! # Transitions
//!
//! | From | Trigger | To |
//! |------|---------|----|
//! | Pending | config resolved | Connecting |
//! | Pending | config resolved, subscribe disabled | Connected |
//! | Connecting, Disconnected | subscription acknowledged | Connected |
//! | Connected | connection lost | Disconnected |
//! | Disconnected | connection restored | Connecting |
//! | any non-terminal | resolution failed | Invalid |
//! | any non-terminal | shutdown or server unsubscribe | Shutdown |
//!
//! Entering a terminal state ends every status and message stream and runs
//! the shutdown hook exactly once.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::Stream;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ChannelAddress, ChannelId};
use crate::protocol::Request;
use crate::scope::ChannelConfig;
use crate::transport::context::RequestSink;

use super::status::{ChannelState, ChannelStatus};
use super::stream::{MessageStream, changes};

// ============================================================================
// Types
// ============================================================================

/// Runs once when the channel enters a terminal state.
pub(crate) type ShutdownHook = Box<dyn FnOnce(&LiveChannel) + Send>;

/// Channel buffer sizes and linger.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChannelSettings {
    pub linger: Duration,
    pub message_capacity: usize,
    pub status_capacity: usize,
}

/// Status plus its observers.
struct StatusCell {
    status: ChannelStatus,
    /// `None` once terminal.
    updates: Option<broadcast::Sender<ChannelStatus>>,
}

/// Shared state of one channel.
struct ChannelInner {
    address: ChannelAddress,
    id: ChannelId,
    status: Mutex<StatusCell>,
    /// `None` once terminal.
    messages: Mutex<Option<broadcast::Sender<Value>>>,
    config: OnceLock<ChannelConfig>,
    on_shutdown: Mutex<Option<ShutdownHook>>,
    requests: RequestSink,
    /// Live message streams.
    consumers: AtomicUsize,
    /// Bumped on every new message stream.
    consumer_epoch: AtomicU64,
    linger: Duration,
}

// ============================================================================
// LiveChannel
// ============================================================================

/// Handle to a multiplexed channel.
///
/// Cloning is cheap; every clone refers to the same channel.
#[derive(Clone)]
pub struct LiveChannel {
    inner: Arc<ChannelInner>,
}

// ============================================================================
// LiveChannel - Display
// ============================================================================

impl fmt::Debug for LiveChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveChannel")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// LiveChannel - Constructor
// ============================================================================

impl LiveChannel {
    /// Creates a pending channel.
    pub(crate) fn new(
        address: ChannelAddress,
        requests: RequestSink,
        settings: ChannelSettings,
    ) -> Self {
        let id = address.id();
        let (updates, _) = broadcast::channel(settings.status_capacity);
        let (messages, _) = broadcast::channel(settings.message_capacity);

        trace!(id = %id, "Channel created");

        Self {
            inner: Arc::new(ChannelInner {
                status: Mutex::new(StatusCell {
                    status: ChannelStatus::pending(id.clone()),
                    updates: Some(updates),
                }),
                address,
                id,
                messages: Mutex::new(Some(messages)),
                config: OnceLock::new(),
                on_shutdown: Mutex::new(None),
                requests,
                consumers: AtomicUsize::new(0),
                consumer_epoch: AtomicU64::new(0),
                linger: settings.linger,
            }),
        }
    }

    /// Installs the hook run on entering a terminal state.
    pub(crate) fn set_shutdown_hook(&self, hook: ShutdownHook) {
        *self.inner.on_shutdown.lock() = Some(hook);
    }
}

// ============================================================================
// LiveChannel - Accessors
// ============================================================================

impl LiveChannel {
    /// Returns the channel id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &ChannelId {
        &self.inner.id
    }

    /// Returns the channel address.
    #[inline]
    #[must_use]
    pub fn address(&self) -> &ChannelAddress {
        &self.inner.address
    }

    /// Returns the resolved config, if resolution finished.
    #[inline]
    #[must_use]
    pub fn config(&self) -> Option<&ChannelConfig> {
        self.inner.config.get()
    }

    /// Returns a status snapshot.
    #[must_use]
    pub fn status(&self) -> ChannelStatus {
        self.inner.status.lock().status.clone()
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.inner.status.lock().status.state
    }

    /// Returns `true` if both handles refer to the same channel instance.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns the number of live message streams.
    #[inline]
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.inner.consumers.load(Ordering::Acquire)
    }
}

// ============================================================================
// LiveChannel - Consumer API
// ============================================================================

impl LiveChannel {
    /// Streams the current status, then every change.
    ///
    /// Ends after the terminal status.
    pub fn status_stream(&self) -> impl Stream<Item = ChannelStatus> + Send + 'static {
        let cell = self.inner.status.lock();
        let current = cell.status.clone();
        match &cell.updates {
            Some(updates) => changes(current, updates.subscribe()).left_stream(),
            None => stream::once(std::future::ready(current)).right_stream(),
        }
    }

    /// Streams processed messages.
    ///
    /// Each stream counts as one consumer. When the last one is dropped the
    /// channel shuts down after the linger unless another stream was opened.
    pub fn messages(&self) -> MessageStream {
        let receiver = self.inner.messages.lock().as_ref().map(broadcast::Sender::subscribe);
        self.inner.consumers.fetch_add(1, Ordering::AcqRel);
        self.inner.consumer_epoch.fetch_add(1, Ordering::AcqRel);
        MessageStream::new(receiver, self.clone())
    }

    /// Publishes a payload without waiting for confirmation.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelClosed`] if the channel is terminal
    /// - [`Error::ChannelNotReady`] if the config is not resolved yet
    /// - [`Error::PublishNotSupported`] if the config forbids publishing
    /// - [`Error::TransportClosed`] if the multiplexer was shut down
    pub fn publish(&self, data: Value) -> Result<()> {
        if self.state().is_terminal() {
            return Err(Error::channel_closed(self.inner.id.clone()));
        }
        let Some(config) = self.inner.config.get() else {
            return Err(Error::channel_not_ready(self.inner.id.clone()));
        };
        if !config.supports_publish {
            return Err(Error::publish_not_supported(self.inner.id.clone()));
        }

        let request = Request::Publish {
            id: self.inner.id.clone(),
            data,
        };
        if !self.inner.requests.send(request) {
            return Err(Error::TransportClosed);
        }
        Ok(())
    }

    /// Shuts the channel down. No-op if already terminal.
    pub fn shutdown(&self) {
        self.transition(|status| {
            if status.state.is_terminal() {
                return false;
            }
            status.state = ChannelState::Shutdown;
            true
        });
    }
}

// ============================================================================
// LiveChannel - Driven by the Multiplexer
// ============================================================================

impl LiveChannel {
    /// Attaches the resolved config and leaves `Pending`.
    ///
    /// Returns `false` if the channel is no longer pending.
    pub(crate) fn initialize(&self, config: ChannelConfig) -> bool {
        let next = if config.can_subscribe {
            ChannelState::Connecting
        } else {
            ChannelState::Connected
        };

        self.transition(|status| {
            if status.state != ChannelState::Pending {
                return false;
            }
            if self.inner.config.set(config).is_err() {
                return false;
            }
            status.state = next;
            true
        })
    }

    /// Marks resolution as failed.
    pub(crate) fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        debug!(id = %self.inner.id, error = %error, "Channel invalid");
        self.transition(|status| {
            if status.state.is_terminal() {
                return false;
            }
            status.state = ChannelState::Invalid;
            status.error = Some(error);
            true
        });
    }

    /// Subscription acknowledged by the transport.
    pub(crate) fn on_subscribed(&self) {
        self.transition(|status| match status.state {
            ChannelState::Connecting | ChannelState::Disconnected => {
                status.state = ChannelState::Connected;
                status.error = None;
                true
            }
            ChannelState::Connected => status.error.take().is_some(),
            _ => false,
        });
    }

    /// Subscription failed; the state is kept.
    pub(crate) fn on_subscription_failed(&self, error: String) {
        warn!(id = %self.inner.id, error = %error, "Subscription failed");
        self.transition(|status| {
            if status.state.is_terminal() {
                return false;
            }
            status.error = Some(error);
            true
        });
    }

    /// Physical connection edge.
    pub(crate) fn on_connection_edge(&self, connected: bool) {
        let subscribes = self
            .inner
            .config
            .get()
            .is_none_or(|config| config.can_subscribe);

        self.transition(|status| match (status.state, connected) {
            (ChannelState::Connected, false) => {
                status.state = ChannelState::Disconnected;
                true
            }
            (ChannelState::Disconnected, true) => {
                status.state = if subscribes {
                    ChannelState::Connecting
                } else {
                    ChannelState::Connected
                };
                true
            }
            _ => false,
        });
    }

    /// Delivers a publication payload.
    pub(crate) fn on_message(&self, data: Value) {
        if self.state().is_terminal() {
            trace!(id = %self.inner.id, "Message for closed channel dropped");
            return;
        }

        let processed = match self.inner.config.get() {
            Some(config) => config.process(data),
            None => Ok(Some(data)),
        };

        match processed {
            Ok(Some(message)) => {
                self.transition(|status| status.error.take().is_some());
                if let Some(tx) = self.inner.messages.lock().as_ref() {
                    // No receivers is not an error.
                    let _ = tx.send(message);
                }
            }
            Ok(None) => trace!(id = %self.inner.id, "Message dropped by processor"),
            Err(e) => {
                debug!(id = %self.inner.id, error = %e, "Message rejected");
                let error = e.to_string();
                self.transition(|status| {
                    if status.state.is_terminal() {
                        return false;
                    }
                    status.error = Some(error);
                    true
                });
            }
        }
    }

    /// Releases one consumer; the last one schedules shutdown.
    pub(crate) fn release_consumer(&self) {
        if self.inner.consumers.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if self.state().is_terminal() {
            return;
        }

        let linger = self.inner.linger;
        if linger.is_zero() {
            debug!(id = %self.inner.id, "Last consumer left");
            self.shutdown();
            return;
        }

        let epoch = self.inner.consumer_epoch.load(Ordering::Acquire);
        let Ok(runtime) = Handle::try_current() else {
            self.shutdown();
            return;
        };

        let channel = self.clone();
        runtime.spawn(async move {
            tokio::time::sleep(linger).await;
            let idle = channel.inner.consumers.load(Ordering::Acquire) == 0
                && channel.inner.consumer_epoch.load(Ordering::Acquire) == epoch;
            if idle {
                debug!(id = %channel.inner.id, "Last consumer left, linger elapsed");
                channel.shutdown();
            }
        });
    }
}

// ============================================================================
// LiveChannel - Internal
// ============================================================================

impl LiveChannel {
    /// Applies a status change.
    ///
    /// `update` returns whether it changed anything. Observers are notified
    /// under the status lock so they see changes in order; the shutdown hook
    /// runs after the lock is released.
    fn transition<F>(&self, update: F) -> bool
    where
        F: FnOnce(&mut ChannelStatus) -> bool,
    {
        let (terminal, hook) = {
            let mut cell = self.inner.status.lock();
            let previous = cell.status.state;
            if !update(&mut cell.status) {
                return false;
            }
            cell.status.touch();

            if previous != cell.status.state {
                debug!(
                    id = %self.inner.id,
                    from = %previous,
                    to = %cell.status.state,
                    "Channel state changed"
                );
            }

            if let Some(updates) = &cell.updates {
                let _ = updates.send(cell.status.clone());
            }

            if cell.status.state.is_terminal() {
                cell.updates = None;
                (true, self.inner.on_shutdown.lock().take())
            } else {
                (false, None)
            }
        };

        if terminal {
            self.inner.messages.lock().take();
            if let Some(hook) = hook {
                hook(self);
            }
        }
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
