//! Registry error types.

use thiserror::Error;
use uuid::Uuid;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A client with this UUID is already registered
    #[error("client already registered: {0}")]
    DuplicateClient(Uuid),
}
