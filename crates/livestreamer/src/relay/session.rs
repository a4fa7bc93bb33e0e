//! Broadcast session state.

use chrono::{DateTime, Utc};

use shared::{BroadcastState, SessionInfo};

/// Input to [`super::BroadcastRelay::start_broadcast`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastContext {
    /// Registry client count at the moment the broadcaster connected
    pub listeners_now: usize,
}

/// The single broadcast session owned by the relay.
///
/// Created on the first successful start and reused by every later start, so a
/// broadcaster can reconnect without listeners re-requesting the stream.
#[derive(Debug, Clone)]
pub struct BroadcastSession {
    pub state: BroadcastState,
    /// Incremented on every start; chunks carry it to detect stale audio
    pub epoch: u64,
    pub listeners_at_start: usize,
    pub listener_peak: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

impl BroadcastSession {
    pub(super) fn new(ctx: BroadcastContext, epoch: u64) -> Self {
        let now = Utc::now();
        Self {
            state: BroadcastState::Active,
            epoch,
            listeners_at_start: ctx.listeners_now,
            listener_peak: ctx.listeners_now,
            created_at: now,
            started_at: now,
        }
    }

    pub(super) fn restart(&mut self, ctx: BroadcastContext, epoch: u64) {
        self.state = BroadcastState::Active;
        self.epoch = epoch;
        self.listeners_at_start = ctx.listeners_now;
        self.listener_peak = ctx.listeners_now;
        self.started_at = Utc::now();
    }

    pub fn is_active(&self) -> bool {
        self.state == BroadcastState::Active
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            state: self.state,
            epoch: self.epoch,
            listeners_at_start: self.listeners_at_start,
            listener_peak: self.listener_peak,
            created_at: self.created_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            started_at: self.started_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }
}
