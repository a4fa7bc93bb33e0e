//! Authentication: password login and cookie sessions.

use anyhow::Result;
use axum::http::{header, HeaderMap};
use rusqlite::Connection;
use sha2::{Digest, Sha256};

use shared::{UserAccount, UserRole};

use crate::db;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "SESSIONID";

/// Hash a password for storage.
pub fn hash_password(password: &str) -> Result<String> {
    Ok(bcrypt::hash(password, bcrypt::DEFAULT_COST)?)
}

/// Generate a random session token (hex).
pub fn generate_session_token() -> String {
    use std::fmt::Write;
    let bytes: [u8; 32] = rand::random();
    let mut s = String::with_capacity(64);
    for b in bytes {
        let _ = write!(&mut s, "{:02x}", b);
    }
    s
}

/// Tokens are looked up by hash, so they must hash deterministically.
pub fn hash_session_token(token: &str) -> String {
    Sha256::digest(token.as_bytes())
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Set-Cookie value for a fresh session.
pub fn session_cookie(token: &str, ttl_secs: u64) -> String {
    format!(
        "{}={}; HttpOnly; Path=/; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, token, ttl_secs
    )
}

/// Set-Cookie value that removes the session cookie.
pub fn expired_session_cookie() -> String {
    format!("{}=; HttpOnly; Path=/; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
}

/// Extract the session token from the Cookie header(s).
pub fn session_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Verify credentials and open a session. Returns (token, user) or None on bad credentials.
pub fn login(
    conn: &Connection,
    username: &str,
    password: &str,
    ttl_secs: u64,
) -> Result<Option<(String, UserAccount)>> {
    let Some((user, password_hash)) = db::get_user_credentials(conn, username)? else {
        return Ok(None);
    };
    if !bcrypt::verify(password, &password_hash).unwrap_or(false) {
        return Ok(None);
    }
    let token = generate_session_token();
    let expires_at = (chrono::Utc::now() + chrono::Duration::seconds(ttl_secs as i64))
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string();
    db::create_session(conn, &hash_session_token(&token), user.id, &expires_at)?;
    Ok(Some((token, user)))
}

/// Resolve a session token to its user.
pub fn authenticate(conn: &Connection, token: &str) -> Result<Option<UserAccount>> {
    db::get_session_user(conn, &hash_session_token(token))
}

/// Close a session. Unknown tokens are ignored.
pub fn logout(conn: &Connection, token: &str) -> Result<()> {
    db::delete_session(conn, &hash_session_token(token))?;
    Ok(())
}

/// Create the initial superadmin unless the username is already taken.
pub fn seed_superadmin(conn: &Connection, username: &str, password: &str) -> Result<bool> {
    if db::user_exists(conn, username)? {
        return Ok(false);
    }
    let password_hash = hash_password(password)?;
    db::create_user(conn, username, &password_hash, UserRole::Superadmin)?;
    Ok(true)
}
