//! Registry of connected WebSocket clients.
//!
//! Membership changes are published as [`RegistryEvent`]s and gate the stats
//! scheduler: it starts when the first client arrives and stops when the last
//! one leaves.

mod client;
pub mod error;
mod store;

pub use client::{Client, ClientSocket};
pub use error::RegistryError;
pub use store::{ClientRegistry, RegistryEvent};
