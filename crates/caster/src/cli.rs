//! CLI argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "caster")]
#[command(about = "Livestreamer caster: broadcast, listen and watch a livestreamer server")]
pub struct Cli {
    /// Server base URL
    #[arg(long, env = "LIVESTREAMER_URL", default_value = "http://localhost:8080")]
    pub url: String,

    #[arg(long, env = "LIVESTREAMER_LOGIN")]
    pub login: Option<String>,

    #[arg(long, env = "LIVESTREAMER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and print the session cookie
    Login,

    /// Broadcast a file, or stdin with "-"
    Push {
        #[arg(value_name = "FILE")]
        source: String,

        /// Pace the upload to this many bytes per second
        #[arg(long)]
        rate: Option<u64>,

        #[arg(long, default_value_t = 16 * 1024)]
        chunk_size: usize,
    },

    /// Pull the live stream to a file or stdout
    Listen {
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Print listener events, reconnecting on failure
    Watch,
}

impl Cli {
    /// Credentials, or an error naming what is missing.
    pub fn credentials(&self) -> anyhow::Result<(&str, &str)> {
        let login = self
            .login
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("LIVESTREAMER_LOGIN or --login required"))?;
        let password = self
            .password
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("LIVESTREAMER_PASSWORD or --password required"))?;
        Ok((login, password))
    }
}
