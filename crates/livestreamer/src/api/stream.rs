//! Audio push and pull endpoints.
//!
//! The broadcaster streams a request body into the relay; every listener gets
//! a streaming response fed from its own relay cursor.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::Response,
    Json,
};
use futures_util::StreamExt;

use shared::StreamStatusResponse;

use crate::api::{current_user, AppState};
use crate::registry::{ClientRegistry, RegistryEvent};
use crate::relay::{BroadcastContext, BroadcastRelay, RelayError, RelayEvent};

/// Ends the broadcast when the push request finishes, fails or is cancelled.
struct BroadcastGuard {
    relay: Arc<BroadcastRelay>,
}

impl Drop for BroadcastGuard {
    fn drop(&mut self) {
        self.relay.end_broadcast();
        self.relay.pause();
    }
}

/// POST /stream/push
pub async fn push(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, (StatusCode, String)> {
    let user = current_user(&state, &headers)?;
    if !user.role.can_broadcast() {
        return Err((
            StatusCode::FORBIDDEN,
            "role may not broadcast".to_string(),
        ));
    }

    let ctx = BroadcastContext {
        listeners_now: state.registry.client_count(),
    };
    let session = state.relay.start_broadcast(ctx).map_err(|e| match e {
        RelayError::BroadcastConflict => (StatusCode::CONFLICT, e.to_string()),
        RelayError::ShutDown => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    })?;
    let _guard = BroadcastGuard {
        relay: state.relay.clone(),
    };
    spawn_peak_tracker(state.relay.clone(), state.registry.clone());
    tracing::info!(user_id = user.id, epoch = session.epoch, "Broadcaster connected");

    let mut chunks = body.into_data_stream();
    let mut bytes_in: u64 = 0;
    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(data) => {
                bytes_in += data.len() as u64;
                state.relay.push_chunk(data);
            }
            Err(e) => {
                tracing::error!(error = %e, epoch = session.epoch, bytes_in, "Broadcast body failed");
                return Ok(StatusCode::NO_CONTENT);
            }
        }
    }
    tracing::debug!(epoch = session.epoch, bytes_in, "Broadcast body finished");
    Ok(StatusCode::NO_CONTENT)
}

/// Feed registry count changes into the session's listener peak until the relay pauses.
fn spawn_peak_tracker(relay: Arc<BroadcastRelay>, registry: Arc<ClientRegistry>) {
    let (registry_sub, mut registry_events) = registry.subscribe();
    let (relay_sub, mut relay_events) = relay.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = relay_events.recv() => match event {
                    Some(RelayEvent::Paused) | None => break,
                    Some(_) => {}
                },
                event = registry_events.recv() => match event {
                    Some(RegistryEvent::ClientCount(count)) => relay.update_listener_peak(count),
                    Some(_) => {}
                    None => break,
                },
            }
        }
        registry.unsubscribe(registry_sub);
        relay.unsubscribe(relay_sub);
        tracing::trace!("Peak tracker stopped");
    });
}

/// GET /stream
pub async fn listen(State(state): State<AppState>) -> Result<Response, (StatusCode, String)> {
    let listener = state
        .relay
        .attach_listener()
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    let body = Body::from_stream(listener.map(Ok::<_, Infallible>));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, state.config.audio_content_type.as_str())
        .header(header::CACHE_CONTROL, "no-cache, no-store")
        .body(body)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// GET /stream/status
pub async fn status(State(state): State<AppState>) -> Json<StreamStatusResponse> {
    let relay = state.relay.status();
    Json(StreamStatusResponse {
        state: relay.state,
        mode: relay.mode,
        listeners: relay.listeners,
        session: relay.session,
        clients: state.registry.client_count(),
        stats_running: state.stats.is_running(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::StatusCode;
    use bytes::Bytes;
    use tower::ServiceExt;

    use shared::{BroadcastState, BufferMode, UserRole};

    use super::*;
    use crate::api::router;
    use crate::api::test_support::*;
    use crate::registry::{Client, ClientSocket};

    fn push_request(token: &str, body: Body) -> axum::http::Request<Body> {
        with_session(request("POST", "/stream/push"), token)
            .body(body)
            .unwrap()
    }

    async fn wait_for_state(state: &AppState, want: BroadcastState) {
        for _ in 0..100 {
            if state.relay.state() == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("relay never reached {:?}", want);
    }

    #[tokio::test]
    async fn push_without_session_is_unauthorized() {
        let app = router(test_state());
        let response = app
            .oneshot(
                request("POST", "/stream/push")
                    .body(Body::from("audio"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn push_as_listener_is_forbidden() {
        let state = test_state();
        let token = user_with_session(&state, "fan", UserRole::Listener);
        let response = router(state.clone())
            .oneshot(push_request(&token, Body::from("audio")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(state.relay.state(), BroadcastState::Inactive);
    }

    #[tokio::test]
    async fn push_reaches_listener_and_pauses_at_end() {
        let state = test_state();
        let token = user_with_session(&state, "dj", UserRole::Streamer);
        let app = router(state.clone());

        let listen = app
            .clone()
            .oneshot(request("GET", "/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(listen.status(), StatusCode::OK);
        assert_eq!(listen.headers()[header::CONTENT_TYPE], "audio/mpeg");
        let mut audio = listen.into_body().into_data_stream();

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, Infallible>>(4);
        let push = tokio::spawn(app.oneshot(push_request(
            &token,
            Body::from_stream(tokio_stream::wrappers::ReceiverStream::new(rx)),
        )));
        wait_for_state(&state, BroadcastState::Active).await;

        tx.send(Ok(Bytes::from_static(b"frame-1"))).await.unwrap();
        assert_eq!(audio.next().await.unwrap().unwrap(), Bytes::from_static(b"frame-1"));

        drop(tx);
        let response = push.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let status = state.relay.status();
        assert_eq!(status.state, BroadcastState::Paused);
        assert_eq!(status.mode, BufferMode::Paused);
        assert_eq!(status.listeners, 1);
    }

    #[tokio::test]
    async fn second_push_conflicts_while_active() {
        let state = test_state();
        let token = user_with_session(&state, "dj", UserRole::Admin);
        let app = router(state.clone());

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, Infallible>>(1);
        let first = tokio::spawn(app.clone().oneshot(push_request(
            &token,
            Body::from_stream(tokio_stream::wrappers::ReceiverStream::new(rx)),
        )));
        wait_for_state(&state, BroadcastState::Active).await;
        let epoch = state.relay.status().session.unwrap().epoch;

        let second = app.oneshot(push_request(&token, Body::from("x"))).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        assert_eq!(state.relay.status().session.unwrap().epoch, epoch);

        drop(tx);
        first.await.unwrap().unwrap();
        assert_eq!(state.relay.state(), BroadcastState::Paused);
    }

    #[tokio::test]
    async fn cancelled_push_ends_broadcast() {
        let state = test_state();
        let token = user_with_session(&state, "dj", UserRole::Streamer);
        let app = router(state.clone());

        let (_tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, Infallible>>(1);
        let push = tokio::spawn(app.oneshot(push_request(
            &token,
            Body::from_stream(tokio_stream::wrappers::ReceiverStream::new(rx)),
        )));
        wait_for_state(&state, BroadcastState::Active).await;

        push.abort();
        wait_for_state(&state, BroadcastState::Paused).await;
        assert_eq!(state.relay.mode(), BufferMode::Paused);
    }

    #[tokio::test]
    async fn registry_growth_raises_session_peak() {
        let state = test_state();
        let token = user_with_session(&state, "dj", UserRole::Streamer);
        let app = router(state.clone());

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, Infallible>>(1);
        let push = tokio::spawn(app.oneshot(push_request(
            &token,
            Body::from_stream(tokio_stream::wrappers::ReceiverStream::new(rx)),
        )));
        wait_for_state(&state, BroadcastState::Active).await;

        let mut sockets = Vec::new();
        for id in 0..3 {
            let (socket, rx) = ClientSocket::channel(8);
            sockets.push(rx);
            state
                .registry
                .add_client(Client {
                    id,
                    uuid: uuid::Uuid::new_v4(),
                    username: format!("fan{}", id),
                    socket,
                })
                .unwrap();
        }

        for _ in 0..100 {
            if state.relay.status().session.unwrap().listener_peak == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let session = state.relay.status().session.unwrap();
        assert_eq!(session.listeners_at_start, 0);
        assert_eq!(session.listener_peak, 3);

        drop(tx);
        push.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn status_reports_relay_and_registry() {
        let state = test_state();
        let app = router(state.clone());

        let response = app
            .oneshot(request("GET", "/stream/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response.into_body()).await;
        assert_eq!(body["state"], "inactive");
        assert_eq!(body["mode"], "paused");
        assert_eq!(body["listeners"], 0);
        assert_eq!(body["clients"], 0);
        assert_eq!(body["stats_running"], false);
        assert!(body["session"].is_null());
    }

    #[tokio::test]
    async fn listen_after_shutdown_is_unavailable() {
        let state = test_state();
        state.relay.shutdown();
        let response = router(state)
            .oneshot(request("GET", "/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
