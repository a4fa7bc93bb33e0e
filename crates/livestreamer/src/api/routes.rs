//! Session route handlers.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use shared::{CreateSessionRequest, SessionUser};

use crate::api::{current_user, internal_error, AppState};
use crate::auth;

/// Per-IP rate limit for login: 5 requests per burst, 1 replenish every 15 seconds.
fn session_rate_limit_layer() -> GovernorLayer<
    tower_governor::key_extractor::PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
    axum::body::Body,
> {
    let config = GovernorConfigBuilder::default()
        .per_second(15)
        .burst_size(5)
        .finish()
        .expect("invalid governor config");
    GovernorLayer::new(config)
}

pub fn session_routes() -> Router<AppState> {
    Router::new().route(
        "/session",
        post(create_session)
            .layer(session_rate_limit_layer())
            .get(get_session)
            .delete(delete_session),
    )
}

/// Log in: verify credentials, open a session, set the cookie.
async fn create_session(
    State(state): State<AppState>,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let Json(req) = body.map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?;
    let login = req.login.trim();
    if login.is_empty() || req.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "login and password are required".to_string(),
        ));
    }

    let ttl = state.config.session_ttl_secs;
    let conn = state.db.conn();
    let Some((token, user)) =
        auth::login(&conn, login, &req.password, ttl).map_err(internal_error)?
    else {
        tracing::warn!(login = %login, "Login failed");
        return Err((StatusCode::UNAUTHORIZED, "invalid credentials".to_string()));
    };
    drop(conn);

    tracing::info!(user_id = user.id, role = user.role.as_str(), "Session created");
    Ok((
        [(header::SET_COOKIE, auth::session_cookie(&token, ttl))],
        Json(SessionUser::from_account(user)),
    ))
}

async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionUser>, (StatusCode, String)> {
    let user = current_user(&state, &headers)?;
    Ok(Json(SessionUser::from_account(user)))
}

/// Log out. Always expires the cookie, even without a live session.
async fn delete_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if let Some(token) = auth::session_token_from_headers(&headers) {
        let conn = state.db.conn();
        auth::logout(&conn, &token).map_err(internal_error)?;
    }
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, auth::expired_session_cookie())],
    ))
}
