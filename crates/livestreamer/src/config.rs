//! Configuration for the livestreamer server.

use std::path::PathBuf;
use std::time::Duration;

use crate::stats::{PeakPolicy, StatsConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub session_ttl_secs: u64,
    pub stats_interval_secs: u64,
    pub stats_peak_policy: PeakPolicy,
    /// Relay buffer size, in chunks per listener
    pub relay_capacity: usize,
    pub ws_outbound_capacity: usize,
    pub audio_content_type: String,
    /// Seeded as superadmin on startup when both are set
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);
        let database_path = std::env::var("DATABASE_PATH")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map(|s| PathBuf::from(shellexpand::tilde(s.trim_start_matches("sqlite:")).into_owned()))
            .unwrap_or_else(|_| PathBuf::from("./data/livestreamer.db"));
        let session_ttl_secs = std::env::var("SESSION_TTL_SECS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse()
            .unwrap_or(86400);
        let stats_interval_secs = std::env::var("STATS_INTERVAL_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u64>()
            .unwrap_or(5)
            .max(1);
        let stats_peak_policy = match std::env::var("STATS_PEAK_POLICY") {
            Ok(v) => PeakPolicy::parse(&v)
                .ok_or_else(|| format!("STATS_PEAK_POLICY: unknown policy '{}'", v))?,
            Err(_) => PeakPolicy::ResetWhenEmpty,
        };
        let relay_capacity = std::env::var("RELAY_CAPACITY")
            .unwrap_or_else(|_| "64".to_string())
            .parse()
            .unwrap_or(64);
        let ws_outbound_capacity = std::env::var("WS_OUTBOUND_CAPACITY")
            .unwrap_or_else(|_| "32".to_string())
            .parse()
            .unwrap_or(32);
        let audio_content_type =
            std::env::var("AUDIO_CONTENT_TYPE").unwrap_or_else(|_| "audio/mpeg".to_string());
        let admin_username = std::env::var("ADMIN_USERNAME").ok().filter(|s| !s.is_empty());
        let admin_password = std::env::var("ADMIN_PASSWORD").ok().filter(|s| !s.is_empty());

        Ok(Self {
            host,
            port,
            database_path,
            session_ttl_secs,
            stats_interval_secs,
            stats_peak_policy,
            relay_capacity,
            ws_outbound_capacity,
            audio_content_type,
            admin_username,
            admin_password,
        })
    }

    pub fn stats(&self) -> StatsConfig {
        StatsConfig {
            interval: Duration::from_secs(self.stats_interval_secs),
            peak_policy: self.stats_peak_policy,
        }
    }

    #[cfg(test)]
    pub fn for_test(database_path: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_path,
            session_ttl_secs: 3600,
            stats_interval_secs: 5,
            stats_peak_policy: PeakPolicy::ResetWhenEmpty,
            relay_capacity: 16,
            ws_outbound_capacity: 8,
            audio_content_type: "audio/mpeg".to_string(),
            admin_username: None,
            admin_password: None,
        }
    }
}
