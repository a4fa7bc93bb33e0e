//! Livestreamer caster: command-line broadcaster and listener.

pub mod cli;
pub mod client;
pub mod watch;
