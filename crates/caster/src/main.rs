//! Livestreamer caster: push audio, pull the stream, watch listener events.

use anyhow::Context;
use caster::cli::{Cli, Commands};
use caster::client::{pacing, LivestreamerClient};
use clap::Parser;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut client = LivestreamerClient::new(&cli.url);

    match &cli.command {
        Commands::Login => {
            let (login, password) = cli.credentials()?;
            let user = client.login(login, password).await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
            println!("{}", client.cookie().unwrap_or_default());
        }
        Commands::Push {
            source,
            rate,
            chunk_size,
        } => {
            let (login, password) = cli.credentials()?;
            client.login(login, password).await?;
            tracing::info!(source = %source, rate = ?rate, "Broadcasting");
            if source == "-" {
                client
                    .push(pacing::chunked(tokio::io::stdin(), *chunk_size, *rate))
                    .await?;
            } else {
                let path = shellexpand::tilde(source).into_owned();
                let file = tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("open {}", path))?;
                client
                    .push(pacing::chunked(file, *chunk_size, *rate))
                    .await?;
            }
            tracing::info!("Broadcast finished");
        }
        Commands::Listen { output } => {
            let mut out: Box<dyn tokio::io::AsyncWrite + Unpin> = match output {
                Some(path) => {
                    let path = shellexpand::tilde(&path.to_string_lossy()).into_owned();
                    Box::new(
                        tokio::fs::File::create(&path)
                            .await
                            .with_context(|| format!("create {}", path))?,
                    )
                }
                None => Box::new(tokio::io::stdout()),
            };
            let mut stream = std::pin::pin!(client.listen().await?);
            let mut received: u64 = 0;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                received += chunk.len() as u64;
                out.write_all(&chunk).await?;
            }
            out.flush().await?;
            tracing::info!(received, "Stream ended");
        }
        Commands::Watch => {
            if let Ok((login, password)) = cli.credentials() {
                client.login(login, password).await?;
            }
            caster::watch::run_watch(&client).await?;
        }
    }

    Ok(())
}
