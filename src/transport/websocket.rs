//! WebSocket pub/sub provider.
//!
//! [`WsProvider`] speaks a JSON command/reply/push protocol over
//! `tokio-tungstenite`. It owns an I/O task that keeps one connection open,
//! re-sends subscriptions after every (re)connect and reconnects after a
//! fixed delay when the connection drops.
//!
//! # Frames
//!
//! | Direction | Frame |
//! |-----------|-------|
//! | → | `{"id":1,"connect":{"data":{"sessionId":"..."}}}` |
//! | → | `{"id":2,"subscribe":{"channel":"..."}}` |
//! | → | `{"id":3,"unsubscribe":{"channel":"..."}}` |
//! | → | `{"id":4,"publish":{"channel":"...","data":{...}}}` |
//! | ← | `{"id":2,"subscribe":{...}}` or `{"id":2,"error":{"code":103,"message":"..."}}` |
//! | ← | `{"push":{"channel":"...","pub":{"data":{...}}}}` |
//! | ← | `{"push":{"channel":"...","unsubscribe":{...}}}` |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::SessionId;

use super::provider::{ProviderEvent, TransportProvider};

// ============================================================================
// Constants
// ============================================================================

/// Default delay between reconnect attempts.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default timeout for the WebSocket handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Channels the provider wants subscribed, shared with the I/O task.
type WantedSet = Arc<Mutex<FxHashSet<String>>>;

/// Commands from the provider handle to the I/O task.
enum WsCommand {
    Subscribe(String),
    Unsubscribe(String),
    Publish { channel: String, data: Value },
    Close,
}

/// Command awaiting its reply.
enum PendingCommand {
    Connect,
    Subscribe(String),
    Unsubscribe(String),
    Publish(String),
}

/// How a connection ended.
enum SessionExit {
    /// Closed on request; do not reconnect.
    Closed,
    /// Lost; reconnect after the delay.
    Lost { reason: String },
}

// ============================================================================
// Frames
// ============================================================================

/// Outgoing command frame.
#[derive(Debug, Serialize)]
struct CommandFrame<'a> {
    id: u32,
    #[serde(flatten)]
    method: Method<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum Method<'a> {
    Connect { data: Value },
    Subscribe { channel: &'a str },
    Unsubscribe { channel: &'a str },
    Publish { channel: &'a str, data: &'a Value },
}

/// Incoming reply or push frame.
#[derive(Debug, Deserialize)]
struct IncomingFrame {
    /// Reply id; `0` for pushes and pings.
    #[serde(default)]
    id: u32,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    push: Option<Push>,
    /// Method-keyed reply body.
    #[serde(flatten)]
    result: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Push {
    channel: String,
    #[serde(rename = "pub", default)]
    publication: Option<Value>,
    #[serde(default)]
    unsubscribe: Option<Value>,
}

// ============================================================================
// WsOptions
// ============================================================================

/// WebSocket provider options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsOptions {
    /// Delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl WsOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the reconnect delay.
    #[inline]
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the handshake timeout.
    #[inline]
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

// ============================================================================
// WsProvider
// ============================================================================

/// Pub/sub provider over a single WebSocket connection.
pub struct WsProvider {
    options: WsOptions,
    wanted: WantedSet,
    command_tx: Option<mpsc::UnboundedSender<WsCommand>>,
    task: Option<JoinHandle<()>>,
}

impl Default for WsProvider {
    fn default() -> Self {
        Self::new(WsOptions::new())
    }
}

impl WsProvider {
    /// Creates a provider that is not connected yet.
    #[must_use]
    pub fn new(options: WsOptions) -> Self {
        Self {
            options,
            wanted: Arc::new(Mutex::new(FxHashSet::default())),
            command_tx: None,
            task: None,
        }
    }

    /// Returns the channels currently wanted.
    #[must_use]
    pub fn wanted_channels(&self) -> Vec<String> {
        let mut channels: Vec<_> = self.wanted.lock().iter().cloned().collect();
        channels.sort();
        channels
    }

    fn send_command(&self, command: WsCommand) {
        if let Some(tx) = &self.command_tx
            && tx.send(command).is_err()
        {
            debug!("I/O task gone, command dropped");
        }
    }
}

#[async_trait]
impl TransportProvider for WsProvider {
    async fn connect(
        &mut self,
        session_id: &SessionId,
        url: &str,
    ) -> Result<mpsc::UnboundedReceiver<ProviderEvent>> {
        if self.command_tx.is_some() {
            return Err(Error::connection("already connected"));
        }

        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "WebSocket URL must use ws:// or wss://, got: {url}"
            )));
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let io = IoTask {
            url,
            session_id: session_id.clone(),
            options: self.options,
            wanted: Arc::clone(&self.wanted),
            events: event_tx,
        };
        self.task = Some(tokio::spawn(io.run(command_rx)));
        self.command_tx = Some(command_tx);

        Ok(event_rx)
    }

    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        self.wanted.lock().insert(channel.to_string());
        self.send_command(WsCommand::Subscribe(channel.to_string()));
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        self.wanted.lock().remove(channel);
        self.send_command(WsCommand::Unsubscribe(channel.to_string()));
        Ok(())
    }

    async fn publish(&mut self, channel: &str, data: Value) -> Result<()> {
        if self.command_tx.is_none() {
            return Err(Error::connection("not connected"));
        }
        self.send_command(WsCommand::Publish {
            channel: channel.to_string(),
            data,
        });
        Ok(())
    }

    async fn close(&mut self) {
        self.send_command(WsCommand::Close);
        self.command_tx = None;
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "WebSocket I/O task failed");
        }
    }
}

// ============================================================================
// IoTask
// ============================================================================

/// Connection loop owned by the provider.
struct IoTask {
    url: Url,
    session_id: SessionId,
    options: WsOptions,
    wanted: WantedSet,
    events: mpsc::UnboundedSender<ProviderEvent>,
}

impl IoTask {
    /// Connects, serves, and reconnects until closed.
    async fn run(self, mut command_rx: mpsc::UnboundedReceiver<WsCommand>) {
        loop {
            match timeout(self.options.connect_timeout, connect_async(self.url.as_str())).await {
                Ok(Ok((ws_stream, _))) => {
                    debug!(url = %self.url, "WebSocket handshake completed");
                    match self.serve(ws_stream, &mut command_rx).await {
                        SessionExit::Closed => break,
                        SessionExit::Lost { reason } => {
                            warn!(reason = %reason, "WebSocket connection lost");
                        }
                    }
                }
                Ok(Err(e)) => warn!(url = %self.url, error = %e, "WebSocket connect failed"),
                Err(_) => warn!(
                    url = %self.url,
                    timeout_ms = self.options.connect_timeout.as_millis() as u64,
                    "WebSocket connect timed out"
                ),
            }

            if !self.wait_reconnect(&mut command_rx).await {
                break;
            }
        }

        debug!("WebSocket I/O task terminated");
    }

    /// Sleeps for the reconnect delay. Returns `false` if closed meanwhile.
    async fn wait_reconnect(&self, command_rx: &mut mpsc::UnboundedReceiver<WsCommand>) -> bool {
        let delay = sleep(self.options.reconnect_delay);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => return true,
                command = command_rx.recv() => match command {
                    Some(WsCommand::Close) | None => return false,
                    Some(WsCommand::Publish { channel, .. }) => {
                        debug!(channel = %channel, "Not connected, publish dropped");
                    }
                    // Applied from the wanted set on reconnect.
                    Some(WsCommand::Subscribe(_) | WsCommand::Unsubscribe(_)) => {}
                },
            }
        }
    }

    /// Serves one physical connection.
    async fn serve(
        &self,
        ws_stream: WsStream,
        command_rx: &mut mpsc::UnboundedReceiver<WsCommand>,
    ) -> SessionExit {
        let (mut ws_write, mut ws_read) = ws_stream.split();
        let mut session = Session {
            next_id: 1,
            pending: FxHashMap::default(),
            connected: false,
        };

        let connect = Method::Connect {
            data: json!({ "sessionId": self.session_id.as_str() }),
        };
        if let Err(e) = session.send(&mut ws_write, connect, PendingCommand::Connect).await {
            return SessionExit::Lost {
                reason: e.to_string(),
            };
        }

        let exit = loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if let Err(e) = self.handle_frame(&text, &mut session, &mut ws_write).await {
                                break SessionExit::Lost { reason: e.to_string() };
                            }
                        }

                        Some(Ok(Message::Close(_))) => {
                            break SessionExit::Lost { reason: Error::ConnectionClosed.to_string() };
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break SessionExit::Lost { reason: e.to_string() };
                        }

                        None => {
                            break SessionExit::Lost { reason: "stream ended".into() };
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(WsCommand::Close) | None => {
                            debug!("Close command received");
                            let _ = ws_write.close().await;
                            break SessionExit::Closed;
                        }
                        Some(command) => {
                            if let Err(e) = self.handle_command(command, &mut session, &mut ws_write).await {
                                break SessionExit::Lost { reason: e.to_string() };
                            }
                        }
                    }
                }
            }
        };

        if session.connected {
            let reason = match &exit {
                SessionExit::Closed => "closed".to_string(),
                SessionExit::Lost { reason } => reason.clone(),
            };
            let _ = self.events.send(ProviderEvent::Disconnected { reason });
        }

        exit
    }

    /// Sends a command on the live connection.
    async fn handle_command(
        &self,
        command: WsCommand,
        session: &mut Session,
        ws_write: &mut WsSink,
    ) -> Result<()> {
        // Before the connect reply, subscriptions wait in the wanted set.
        if !session.connected {
            if let WsCommand::Publish { channel, .. } = &command {
                debug!(channel = %channel, "Not connected, publish dropped");
            }
            return Ok(());
        }

        match command {
            WsCommand::Subscribe(channel) => {
                let method = Method::Subscribe { channel: &channel };
                session
                    .send(ws_write, method, PendingCommand::Subscribe(channel.clone()))
                    .await
            }
            WsCommand::Unsubscribe(channel) => {
                let method = Method::Unsubscribe { channel: &channel };
                session
                    .send(ws_write, method, PendingCommand::Unsubscribe(channel.clone()))
                    .await
            }
            WsCommand::Publish { channel, data } => {
                let method = Method::Publish {
                    channel: &channel,
                    data: &data,
                };
                session
                    .send(ws_write, method, PendingCommand::Publish(channel.clone()))
                    .await
            }
            WsCommand::Close => Ok(()),
        }
    }

    /// Handles one text frame. An error drops the connection.
    async fn handle_frame(
        &self,
        text: &str,
        session: &mut Session,
        ws_write: &mut WsSink,
    ) -> Result<()> {
        let mut frame: IncomingFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, text = %text, "Failed to parse incoming frame");
                return Ok(());
            }
        };

        if let Some(push) = frame.push {
            self.handle_push(push);
            return Ok(());
        }

        if frame.id == 0 {
            trace!("Ping frame");
            return Ok(());
        }

        let Some(pending) = session.pending.remove(&frame.id) else {
            warn!(id = frame.id, "Reply for unknown command");
            return Ok(());
        };

        match pending {
            PendingCommand::Connect => {
                if let Some(error) = frame.error {
                    return Err(Error::protocol(format!("connect rejected: {error}")));
                }
                session.connected = true;
                info!(url = %self.url, "Connected");
                let _ = self.events.send(ProviderEvent::Connected);

                let channels: Vec<_> = self.wanted.lock().iter().cloned().collect();
                for channel in channels {
                    let method = Method::Subscribe { channel: &channel };
                    session
                        .send(ws_write, method, PendingCommand::Subscribe(channel.clone()))
                        .await?;
                }
            }

            PendingCommand::Subscribe(channel) => {
                let event = match frame.error {
                    Some(error) => ProviderEvent::SubscribeFailed {
                        channel,
                        context: json!({ "error": error }),
                    },
                    None => ProviderEvent::Subscribed {
                        context: frame.result.remove("subscribe").unwrap_or(Value::Null),
                        channel,
                    },
                };
                let _ = self.events.send(event);
            }

            PendingCommand::Unsubscribe(channel) => {
                trace!(channel = %channel, "Unsubscribe acknowledged");
            }

            PendingCommand::Publish(channel) => {
                if let Some(error) = frame.error {
                    warn!(channel = %channel, error = %error, "Publish rejected");
                }
            }
        }

        Ok(())
    }

    /// Handles a server push.
    fn handle_push(&self, push: Push) {
        if let Some(publication) = push.publication {
            let _ = self.events.send(ProviderEvent::Publication {
                channel: push.channel,
                context: publication,
            });
        } else if let Some(context) = push.unsubscribe {
            self.wanted.lock().remove(&push.channel);
            let _ = self.events.send(ProviderEvent::Unsubscribed {
                channel: push.channel,
                context,
            });
        } else {
            trace!(channel = %push.channel, "Unhandled push");
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// Per-connection command state.
struct Session {
    next_id: u32,
    pending: FxHashMap<u32, PendingCommand>,
    connected: bool,
}

impl Session {
    /// Serializes and sends a command, recording it for its reply.
    async fn send(
        &mut self,
        ws_write: &mut WsSink,
        method: Method<'_>,
        pending: PendingCommand,
    ) -> Result<()> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        let json = serde_json::to_string(&CommandFrame { id, method })?;
        self.pending.insert(id, pending);

        if let Err(e) = ws_write.send(Message::Text(json.into())).await {
            self.pending.remove(&id);
            return Err(Error::WebSocket(e));
        }

        trace!(id, "Command sent");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
