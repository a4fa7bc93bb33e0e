//! Shared wire types for the livestreamer server and the caster client.

mod models;

// Explicit re-exports (avoids rust-analyzer issues with `pub use models::*`)
pub use models::ws_types;
pub use models::{
    BroadcastState, BufferMode, CreateSessionRequest, DeletedClient, SanitizedClient,
    SessionInfo, SessionUser, StatsSnapshot, StreamStatusResponse, UserAccount, UserProfile,
    UserRole, WelcomePayload, WsEnvelope,
};
