//! Live audio relay.
//!
//! One broadcaster pushes opaque audio bytes, any number of listeners pull
//! them. Fan-out uses `tokio::sync::broadcast`: chunks are `bytes::Bytes`, so
//! every listener shares the same allocation.
//!
//! ```text
//!   POST /stream/push            Arc<BroadcastRelay>             GET /stream
//!   ┌──────────────┐   push_chunk   ┌──────────────────┐   recv   ┌──────────────┐
//!   │ request body ├──────────────►│ session (1)      ├────────►│ ListenerStream│ x N
//!   └──────────────┘               │ mode flow/paused │         └──────────────┘
//!                                  │ broadcast::Tx    │
//!                                  └──────────────────┘
//! ```
//!
//! The pipe itself is never closed while the server runs. "No data right now"
//! is expressed by `pause`, which keeps every listener subscribed, so a
//! broadcaster may reconnect and resume.

pub mod error;
mod listener;
mod pipe;
mod session;

pub use error::RelayError;
pub use listener::{ListenerId, ListenerStream, RelayChunk};
pub use pipe::{BroadcastRelay, RelayEvent, RelayStatus};
pub use session::{BroadcastContext, BroadcastSession};
