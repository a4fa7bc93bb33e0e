//! Livestreamer server: live audio relay, listener registry, stats.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod events;
pub mod message;
pub mod registry;
pub mod relay;
pub mod stats;
