//! WebSocket endpoint: one registry client per authenticated socket.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use shared::{ws_types, UserAccount, WelcomePayload, WsEnvelope};

use crate::api::{current_user, AppState};
use crate::events::SubscriptionId;
use crate::message::envelope;
use crate::registry::{Client, ClientRegistry, ClientSocket, RegistryEvent};
use crate::relay::{BroadcastRelay, RelayEvent};

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// GET /ws. The session cookie is checked before the upgrade.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, (StatusCode, String)> {
    let user = current_user(&state, &headers)?;
    let ws = ws.map_err(|e| (e.status(), e.body_text()))?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: UserAccount) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let uuid = Uuid::new_v4();
    let (client_socket, mut outbound) = ClientSocket::channel(state.config.ws_outbound_capacity);

    // Subscribe before joining so no membership change after the welcome is missed.
    let registry_sub = state.registry.subscribe();
    let relay_sub = state.relay.subscribe();

    let client = Client {
        id: user.id,
        uuid,
        username: user.username.clone(),
        socket: client_socket.clone(),
    };
    if let Err(e) = state.registry.add_client(client) {
        state.registry.unsubscribe(registry_sub.0);
        state.relay.unsubscribe(relay_sub.0);
        let error = envelope(ws_types::ERROR, &serde_json::json!({ "reason": e.to_string() }));
        let _ = send_envelope(&mut ws_tx, &error).await;
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    }
    tracing::info!(uuid = %uuid, user_id = user.id, "WebSocket client connected");

    let welcome = envelope(
        ws_types::WELCOME,
        &WelcomePayload {
            uuid,
            clients: state.registry.sanitized_clients(),
        },
    );
    let forwarder = spawn_event_forwarder(
        uuid,
        client_socket,
        state.registry.clone(),
        registry_sub,
        state.relay.clone(),
        relay_sub,
    );

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping_interval.reset();

    if send_envelope(&mut ws_tx, &welcome).await.is_ok() {
        loop {
            let next = tokio::select! {
                queued = outbound.recv() => match queued {
                    Some(env) => Some(env),
                    None => break,
                },
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                    None
                }
                incoming = ws_rx.next() => match incoming {
                    Some(Ok(Message::Text(text))) => reply_to(&text),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => None,
                },
            };
            if let Some(env) = next {
                if send_envelope(&mut ws_tx, &env).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(outbound);
    state.registry.delete_client(&uuid);
    let _ = forwarder.await;
    tracing::info!(uuid = %uuid, user_id = user.id, "WebSocket client disconnected");
}

/// Move registry and relay events into the client's bounded outbound queue.
///
/// Events for a client that does not drain its queue are dropped instead of
/// piling up. The task ends once the queue's receiver is gone.
fn spawn_event_forwarder(
    own: Uuid,
    socket: ClientSocket,
    registry: Arc<ClientRegistry>,
    (registry_sub, mut registry_events): (SubscriptionId, UnboundedReceiver<RegistryEvent>),
    relay: Arc<BroadcastRelay>,
    (relay_sub, mut relay_events): (SubscriptionId, UnboundedReceiver<RelayEvent>),
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = socket.closed() => break,
                event = registry_events.recv() => match event {
                    Some(event) => registry_envelope(own, event),
                    None => break,
                },
                event = relay_events.recv() => match event {
                    Some(event) => relay_envelope(event),
                    None => break,
                },
            };
            if let Some(env) = next {
                socket.send(env);
            }
        }
        registry.unsubscribe(registry_sub);
        relay.unsubscribe(relay_sub);
    })
}

async fn send_envelope<S>(ws_tx: &mut S, env: &WsEnvelope) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let json = serde_json::to_string(env).map_err(axum::Error::new)?;
    ws_tx.send(Message::Text(json.into())).await
}

/// Registry event as seen by the client `own`. Its own arrival is already in the welcome.
fn registry_envelope(own: Uuid, event: RegistryEvent) -> Option<WsEnvelope> {
    match event {
        RegistryEvent::AddClient(client) if client.uuid != own => {
            Some(envelope(ws_types::ADD_CLIENT, &client))
        }
        RegistryEvent::DeleteClient(client) => Some(envelope(ws_types::DELETE_CLIENT, &client)),
        _ => None,
    }
}

fn relay_envelope(event: RelayEvent) -> Option<WsEnvelope> {
    match event {
        RelayEvent::Started(session) => Some(envelope(ws_types::BROADCAST_STARTED, &session)),
        RelayEvent::Paused => Some(envelope(ws_types::BROADCAST_PAUSED, &serde_json::json!({}))),
        RelayEvent::Ended(_) => None,
    }
}

/// Answer a client text frame. Only `ping` gets a reply.
fn reply_to(text: &str) -> Option<WsEnvelope> {
    match serde_json::from_str::<WsEnvelope>(text) {
        Ok(env) if env.r#type == ws_types::PING => {
            Some(envelope(ws_types::PONG, &serde_json::json!({})))
        }
        _ => None,
    }
}
