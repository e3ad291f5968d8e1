//! Consumer streams.
//!
//! [`MessageStream`] delivers a channel's messages and counts as one
//! consumer while alive. [`changes`] turns a broadcast of values into a
//! stream that starts with the current value and never repeats itself.

// ============================================================================
// Imports
// ============================================================================

use std::future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use super::channel::LiveChannel;

// ============================================================================
// MessageStream
// ============================================================================

/// Stream of processed messages from one channel.
///
/// Ends when the channel reaches a terminal state. Dropping the last stream
/// of a channel shuts it down after the configured linger.
pub struct MessageStream {
    inner: Pin<Box<dyn Stream<Item = Value> + Send>>,
    _consumer: ConsumerGuard,
}

impl MessageStream {
    pub(crate) fn new(receiver: Option<broadcast::Receiver<Value>>, channel: LiveChannel) -> Self {
        let inner: Pin<Box<dyn Stream<Item = Value> + Send>> = match receiver {
            Some(rx) => Box::pin(stream::unfold(rx, |mut rx| async move {
                loop {
                    match rx.recv().await {
                        Ok(message) => return Some((message, rx)),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Message consumer lagged, messages dropped");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            })),
            None => Box::pin(stream::empty()),
        };

        Self {
            inner,
            _consumer: ConsumerGuard { channel },
        }
    }
}

impl Stream for MessageStream {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Releases one consumer reference on drop.
struct ConsumerGuard {
    channel: LiveChannel,
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        self.channel.release_consumer();
    }
}

// ============================================================================
// changes
// ============================================================================

/// Current value, then every broadcast value that differs from the last one.
///
/// Lagging receivers skip ahead; the comparison still holds against the
/// last value actually yielded.
pub(crate) fn changes<T>(
    current: T,
    receiver: broadcast::Receiver<T>,
) -> impl Stream<Item = T> + Send + 'static
where
    T: Clone + PartialEq + Send + 'static,
{
    let updates = stream::unfold((receiver, current.clone()), |(mut rx, last)| async move {
        loop {
            match rx.recv().await {
                Ok(value) if value != last => return Some((value.clone(), (rx, value))),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Observer lagged"),
                Err(RecvError::Closed) => return None,
            }
        }
    });

    stream::once(future::ready(current)).chain(updates)
}

// ============================================================================
// Tests
// ============================================================================
