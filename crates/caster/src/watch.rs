//! WebSocket watcher: prints listener events as they arrive.

use std::time::Duration;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use shared::{
    ws_types, DeletedClient, SanitizedClient, SessionInfo, StatsSnapshot, WelcomePayload,
    WsEnvelope,
};

use crate::client::LivestreamerClient;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Connect to the event feed and print events forever, reconnecting on failure.
pub async fn run_watch(client: &LivestreamerClient) -> Result<()> {
    let url = client.ws_url();
    loop {
        let mut request = url.as_str().into_client_request()?;
        if let Some(cookie) = client.cookie() {
            request
                .headers_mut()
                .insert(header::COOKIE, HeaderValue::from_str(cookie)?);
        }
        match connect_async(request).await {
            Ok((ws, _)) => {
                tracing::info!("Connected to {}", url);
                if let Err(e) = handle_connection(ws).await {
                    tracing::warn!("Connection error: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!("Connect failed: {}, retrying in 5s", e);
            }
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn handle_connection(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Result<()> {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.reset();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(t))) => t,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(_)) => continue,
                };
                let Ok(envelope) = serde_json::from_str::<WsEnvelope>(&text) else {
                    tracing::debug!("Ignoring malformed message");
                    continue;
                };
                if let Some(line) = describe(&envelope) {
                    println!("{}", line);
                }
            }
            _ = ping_interval.tick() => {
                let ping = serde_json::json!({ "version": 1, "type": ws_types::PING, "payload": {} });
                ws_tx.send(Message::Text(ping.to_string())).await?;
            }
        }
    }
    tracing::info!("Server closed the connection");
    Ok(())
}

/// One human-readable line per event worth showing.
pub fn describe(envelope: &WsEnvelope) -> Option<String> {
    let payload = envelope.payload.clone();
    match envelope.r#type.as_str() {
        ws_types::WELCOME => {
            let welcome: WelcomePayload = serde_json::from_value(payload).ok()?;
            Some(format!(
                "connected as {}, {} online",
                welcome.uuid,
                welcome.clients.len()
            ))
        }
        ws_types::ADD_CLIENT => {
            let client: SanitizedClient = serde_json::from_value(payload).ok()?;
            Some(format!("+ {}", client.username))
        }
        ws_types::DELETE_CLIENT => {
            let client: DeletedClient = serde_json::from_value(payload).ok()?;
            Some(format!("- {}", client.username))
        }
        ws_types::STATS => {
            let stats: StatsSnapshot = serde_json::from_value(payload).ok()?;
            Some(format!("listeners: {} (peak {})", stats.count, stats.peak))
        }
        ws_types::BROADCAST_STARTED => {
            let session: SessionInfo = serde_json::from_value(payload).ok()?;
            Some(format!(
                "broadcast started (epoch {}, {} listening)",
                session.epoch, session.listeners_at_start
            ))
        }
        ws_types::BROADCAST_PAUSED => Some("broadcast paused".to_string()),
        ws_types::ERROR => Some(format!(
            "error: {}",
            envelope.payload["reason"].as_str().unwrap_or("unknown")
        )),
        _ => None,
    }
}
