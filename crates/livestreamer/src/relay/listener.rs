//! Listener read side of the relay.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures_util::task::AtomicWaker;
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use super::BroadcastRelay;

/// Identifies one attached listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(super) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A chunk as it travels through the relay buffer.
#[derive(Debug, Clone)]
pub struct RelayChunk {
    /// Broadcast epoch the chunk was pushed in
    pub epoch: u64,
    pub data: Bytes,
}

/// Relay-side handle on a listener's read cursor.
#[derive(Default)]
pub(super) struct Cursor {
    closed: AtomicBool,
    waker: AtomicWaker,
}

impl Cursor {
    /// Close the cursor and wake the stream so it ends.
    pub(super) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.waker.wake();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Lazy sequence of audio chunks for one listener.
///
/// Yields `None` once the listener is detached or the relay is shut down.
/// Dropping the stream detaches the listener.
pub struct ListenerStream {
    id: ListenerId,
    /// `None` once the cursor is released
    inner: Option<BroadcastStream<RelayChunk>>,
    cursor: Arc<Cursor>,
    current_epoch: Arc<AtomicU64>,
    relay: Weak<BroadcastRelay>,
    dropped: u64,
}

impl ListenerStream {
    pub(super) fn new(
        id: ListenerId,
        rx: broadcast::Receiver<RelayChunk>,
        cursor: Arc<Cursor>,
        current_epoch: Arc<AtomicU64>,
        relay: Weak<BroadcastRelay>,
    ) -> Self {
        Self {
            id,
            inner: Some(BroadcastStream::new(rx)),
            cursor,
            current_epoch,
            relay,
            dropped: 0,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Chunks this listener lost by lagging behind or by belonging to an old epoch.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Stream for ListenerStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        let this = &mut *self;
        this.cursor.waker.register(cx.waker());
        if this.cursor.is_closed() {
            this.inner = None;
        }
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        loop {
            match ready!(inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => {
                    if chunk.epoch < this.current_epoch.load(Ordering::Acquire) {
                        this.dropped += 1;
                        continue;
                    }
                    return Poll::Ready(Some(chunk.data));
                }
                Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                    tracing::debug!(listener = %this.id, dropped = n, "Listener lagging, chunks dropped");
                    this.dropped += n;
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

impl Drop for ListenerStream {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.upgrade() {
            relay.detach_listener(self.id);
        }
    }
}
