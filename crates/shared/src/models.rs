//! Shared request/response and domain models.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User role. Decides which profile shape a session returns and who may broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Listener,
    Streamer,
    Admin,
    Superadmin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Listener => "listener",
            Self::Streamer => "streamer",
            Self::Admin => "admin",
            Self::Superadmin => "superadmin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "listener" => Some(Self::Listener),
            "streamer" => Some(Self::Streamer),
            "admin" => Some(Self::Admin),
            "superadmin" => Some(Self::Superadmin),
            _ => None,
        }
    }

    /// Admins see the full account record.
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin | Self::Superadmin)
    }

    pub fn can_broadcast(&self) -> bool {
        !matches!(self, Self::Listener)
    }
}

// --- Session DTOs ---

/// Create session (login) request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub login: String,
    pub password: String,
}

/// Short user profile, returned to non-admin users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
}

/// Full user account, returned to admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
    pub role: UserRole,
    pub created_at: String,
    pub updated_at: String,
}

/// Body of a successful session request: account for admins, profile otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionUser {
    Account(UserAccount),
    Profile(UserProfile),
}

impl SessionUser {
    pub fn from_account(account: UserAccount) -> Self {
        if account.role.is_admin() {
            Self::Account(account)
        } else {
            Self::Profile(UserProfile {
                id: account.id,
                username: account.username,
            })
        }
    }
}

// --- Registry / stats DTOs ---

/// Public projection of a registry client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizedClient {
    pub uuid: Uuid,
    pub username: String,
}

/// delete_client payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedClient {
    pub uuid: Uuid,
    pub username: String,
    pub id: i64,
}

/// Aggregate listener stats published by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub count: usize,
    pub peak: usize,
}

/// welcome payload, first message on every socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WelcomePayload {
    pub uuid: Uuid,
    pub clients: Vec<SanitizedClient>,
}

// --- Relay status ---

/// Broadcast session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastState {
    Inactive,
    Active,
    Paused,
}

/// Relay buffer mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferMode {
    Flowing,
    Paused,
}

/// Snapshot of the current (or last) broadcast session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub state: BroadcastState,
    pub epoch: u64,
    pub listeners_at_start: usize,
    pub listener_peak: usize,
    pub created_at: String,
    pub started_at: String,
}

/// GET /stream/status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStatusResponse {
    pub state: BroadcastState,
    pub mode: BufferMode,
    pub listeners: usize,
    pub session: Option<SessionInfo>,
    pub clients: usize,
    pub stats_running: bool,
}

// --- WebSocket envelope ---

/// WebSocket message envelope (version 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEnvelope {
    #[serde(default)]
    pub version: u8,
    pub r#type: String,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
}

/// WebSocket message types.
pub mod ws_types {
    pub const WELCOME: &str = "welcome";
    pub const ADD_CLIENT: &str = "add_client";
    pub const DELETE_CLIENT: &str = "delete_client";
    pub const STATS: &str = "stats";
    pub const BROADCAST_STARTED: &str = "broadcast_started";
    pub const BROADCAST_PAUSED: &str = "broadcast_paused";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";
}
