//! The broadcast relay: one push side, many pull sides.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};

use shared::{BroadcastState, BufferMode, SessionInfo};

use crate::events::{EventHub, SubscriptionId};

use super::error::RelayError;
use super::listener::{Cursor, ListenerId, ListenerStream, RelayChunk};
use super::session::{BroadcastContext, BroadcastSession};

/// Lifecycle events published by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A broadcast session became active
    Started(SessionInfo),
    /// The active session ended (broadcaster gone)
    Ended(SessionInfo),
    /// The buffer switched from flowing to paused
    Paused,
}

/// Point-in-time view of the relay.
#[derive(Debug, Clone)]
pub struct RelayStatus {
    pub state: BroadcastState,
    pub mode: BufferMode,
    pub listeners: usize,
    pub session: Option<SessionInfo>,
}

struct AttachedListener {
    attached_at: Instant,
    cursor: Arc<Cursor>,
}

struct RelayInner {
    session: Option<BroadcastSession>,
    mode: BufferMode,
    /// `None` once the relay is shut down
    tx: Option<broadcast::Sender<RelayChunk>>,
    listeners: HashMap<ListenerId, AttachedListener>,
    next_listener: u64,
}

/// Single-broadcaster audio relay.
///
/// All state lives behind one mutex. Writes never block: the fan-out is a
/// bounded `broadcast` channel, and a listener that falls more than
/// `capacity` chunks behind loses the oldest ones.
pub struct BroadcastRelay {
    inner: Mutex<RelayInner>,
    current_epoch: Arc<AtomicU64>,
    events: EventHub<RelayEvent>,
    capacity: usize,
    me: Weak<BroadcastRelay>,
}

impl BroadcastRelay {
    /// Create a relay whose buffer holds up to `capacity` chunks per listener.
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Arc::new_cyclic(|me| Self {
            inner: Mutex::new(RelayInner {
                session: None,
                mode: BufferMode::Paused,
                tx: Some(tx),
                listeners: HashMap::new(),
                next_listener: 0,
            }),
            current_epoch: Arc::new(AtomicU64::new(0)),
            events: EventHub::new(),
            capacity,
            me: me.clone(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start (or resume) the broadcast session.
    ///
    /// Fails with [`RelayError::BroadcastConflict`] while a session is active;
    /// the active session is left untouched.
    pub fn start_broadcast(&self, ctx: BroadcastContext) -> Result<SessionInfo, RelayError> {
        let mut inner = self.lock();
        if inner.tx.is_none() {
            return Err(RelayError::ShutDown);
        }
        if inner.session.as_ref().is_some_and(|s| s.is_active()) {
            tracing::warn!("Broadcast start rejected, session already active");
            return Err(RelayError::BroadcastConflict);
        }

        let epoch = self.current_epoch.load(Ordering::Acquire) + 1;
        let info = match inner.session.as_mut() {
            Some(session) => {
                session.restart(ctx, epoch);
                session.info()
            }
            None => {
                let session = BroadcastSession::new(ctx, epoch);
                let info = session.info();
                inner.session = Some(session);
                info
            }
        };
        self.current_epoch.store(epoch, Ordering::Release);
        inner.mode = BufferMode::Flowing;

        tracing::info!(
            epoch = epoch,
            listeners_now = ctx.listeners_now,
            attached = inner.listeners.len(),
            "Broadcast started"
        );
        self.events.publish(RelayEvent::Started(info.clone()));
        Ok(info)
    }

    /// Push a chunk of audio to every attached listener.
    ///
    /// Returns `false` when the chunk was discarded because no session is
    /// active or the buffer is paused.
    pub fn push_chunk(&self, data: Bytes) -> bool {
        let inner = self.lock();
        let active = inner.session.as_ref().is_some_and(|s| s.is_active());
        if !active || inner.mode != BufferMode::Flowing {
            tracing::trace!(len = data.len(), "Chunk discarded, no active broadcast");
            return false;
        }
        let Some(tx) = inner.tx.as_ref() else {
            return false;
        };
        let chunk = RelayChunk {
            epoch: self.current_epoch.load(Ordering::Acquire),
            data,
        };
        // Err only means nobody is listening right now; the chunk is lost.
        let _ = tx.send(chunk);
        true
    }

    /// End the active session. No-op unless a session is active.
    pub fn end_broadcast(&self) -> bool {
        let mut inner = self.lock();
        let Some(session) = inner.session.as_mut().filter(|s| s.is_active()) else {
            return false;
        };
        session.state = BroadcastState::Paused;
        let info = session.info();
        tracing::info!(
            epoch = info.epoch,
            listener_peak = info.listener_peak,
            "Broadcast ended"
        );
        self.events.publish(RelayEvent::Ended(info));
        true
    }

    /// Switch the buffer to paused without touching listener subscriptions.
    pub fn pause(&self) -> bool {
        let mut inner = self.lock();
        if inner.mode == BufferMode::Paused {
            return false;
        }
        inner.mode = BufferMode::Paused;
        tracing::debug!(attached = inner.listeners.len(), "Relay buffer paused");
        self.events.publish(RelayEvent::Paused);
        true
    }

    /// Raise the active session's listener peak.
    pub fn update_listener_peak(&self, count: usize) {
        let mut inner = self.lock();
        if let Some(session) = inner.session.as_mut().filter(|s| s.is_active()) {
            if count > session.listener_peak {
                session.listener_peak = count;
                tracing::debug!(peak = count, "Listener peak raised");
            }
        }
    }

    /// Register a new read cursor.
    pub fn attach_listener(&self) -> Result<ListenerStream, RelayError> {
        let mut inner = self.lock();
        let rx = inner.tx.as_ref().ok_or(RelayError::ShutDown)?.subscribe();
        let id = ListenerId(inner.next_listener);
        inner.next_listener += 1;
        let cursor = Arc::new(Cursor::default());
        inner.listeners.insert(
            id,
            AttachedListener {
                attached_at: Instant::now(),
                cursor: Arc::clone(&cursor),
            },
        );
        tracing::info!(listener = %id, listeners = inner.listeners.len(), "Listener attached");
        Ok(ListenerStream::new(
            id,
            rx,
            cursor,
            Arc::clone(&self.current_epoch),
            self.me.clone(),
        ))
    }

    /// Remove a read cursor; its stream ends without further data. Safe to call repeatedly.
    pub fn detach_listener(&self, id: ListenerId) -> bool {
        let mut inner = self.lock();
        match inner.listeners.remove(&id) {
            Some(AttachedListener {
                attached_at,
                cursor,
            }) => {
                cursor.close();
                tracing::info!(
                    listener = %id,
                    listeners = inner.listeners.len(),
                    secs = attached_at.elapsed().as_secs(),
                    "Listener detached"
                );
                true
            }
            None => false,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn state(&self) -> BroadcastState {
        self.lock()
            .session
            .as_ref()
            .map_or(BroadcastState::Inactive, |s| s.state)
    }

    pub fn mode(&self) -> BufferMode {
        self.lock().mode
    }

    pub fn status(&self) -> RelayStatus {
        let inner = self.lock();
        RelayStatus {
            state: inner
                .session
                .as_ref()
                .map_or(BroadcastState::Inactive, |s| s.state),
            mode: inner.mode,
            listeners: inner.listeners.len(),
            session: inner.session.as_ref().map(BroadcastSession::info),
        }
    }

    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<RelayEvent>) {
        self.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.events.unsubscribe(id);
    }

    /// Tear the pipe down. Every listener stream ends; later attaches fail.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if inner.tx.take().is_none() {
            return;
        }
        if let Some(session) = inner.session.as_mut().filter(|s| s.is_active()) {
            session.state = BroadcastState::Paused;
        }
        let was_flowing = inner.mode == BufferMode::Flowing;
        inner.mode = BufferMode::Paused;
        tracing::info!(listeners = inner.listeners.len(), "Relay shut down");
        if was_flowing {
            self.events.publish(RelayEvent::Paused);
        }
    }

    fn lock(&self) -> MutexGuard<'_, RelayInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
