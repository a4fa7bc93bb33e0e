//! HTTP API routes.

mod routes;
mod stream;
mod ws;

use axum::{
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use shared::UserAccount;

use crate::auth;
use crate::config::Config;
use crate::db::Db;
use crate::registry::ClientRegistry;
use crate::relay::BroadcastRelay;
use crate::stats::StatsScheduler;

/// Shared app state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Db>,
    pub relay: Arc<BroadcastRelay>,
    pub registry: Arc<ClientRegistry>,
    pub stats: Arc<StatsScheduler>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire relay, registry and stats scheduler from config.
    pub fn new(db: Arc<Db>, config: Arc<Config>) -> Self {
        let stats = Arc::new(StatsScheduler::new(config.stats()));
        let registry = ClientRegistry::new(stats.clone());
        let relay = BroadcastRelay::new(config.relay_capacity);
        Self {
            db,
            relay,
            registry,
            stats,
            config,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .merge(routes::session_routes())
        .route("/stream", get(stream::listen))
        .route("/stream/push", post(stream::push))
        .route("/stream/status", get(stream::status))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Resolve the session cookie to a user, or 401.
fn current_user(state: &AppState, headers: &HeaderMap) -> Result<UserAccount, (StatusCode, String)> {
    let token = auth::session_token_from_headers(headers)
        .ok_or((StatusCode::UNAUTHORIZED, "missing session".to_string()))?;
    let conn = state.db.conn();
    auth::authenticate(&conn, &token)
        .map_err(internal_error)?
        .ok_or((StatusCode::UNAUTHORIZED, "invalid session".to_string()))
}

fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!(error = %e, "Request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}


#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn health_is_ok() {
        let app = router(test_state());
        let response = app
            .oneshot(request("GET", "/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&body_bytes(response.into_body()).await[..], b"ok");
    }
}
