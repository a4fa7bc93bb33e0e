//! Livestreamer server: HTTP audio push/pull plus a WebSocket stats feed.
//!
//! Optional env: HOST, PORT, DATABASE_PATH, SESSION_TTL_SECS, STATS_INTERVAL_SECS,
//! STATS_PEAK_POLICY, RELAY_CAPACITY, WS_OUTBOUND_CAPACITY, AUDIO_CONTENT_TYPE,
//! ADMIN_USERNAME, ADMIN_PASSWORD

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use livestreamer::{api, auth, config, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;
    let config = Arc::new(config);

    let db = db::Db::open(&config.database_path)?;
    db.run_migrations()?;
    {
        let conn = db.conn();
        if let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password) {
            if auth::seed_superadmin(&conn, username, password)? {
                tracing::info!(username = %username, "Seeded superadmin");
            }
        }
        let purged = db::purge_expired_sessions(&conn)?;
        tracing::debug!(purged, "Expired sessions purged");
    }
    let db = Arc::new(db);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid bind address: {}", e))?;

    let state = api::AppState::new(db, config);
    let relay = state.relay.clone();
    let app = api::router(state);

    tracing::info!("Livestreamer listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown requested");
        // Listener responses only end once the relay is gone.
        relay.shutdown();
    })
    .await?;

    Ok(())
}
