//! Relay error types.

use thiserror::Error;

/// Error type for relay operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// A broadcast session is already active
    #[error("a broadcast is already active")]
    BroadcastConflict,
    /// The relay was torn down
    #[error("relay has been shut down")]
    ShutDown,
}
