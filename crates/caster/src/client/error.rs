//! Client errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid credentials")]
    Unauthorized,

    #[error("this account may not broadcast")]
    Forbidden,

    #[error("another broadcast is already active")]
    BroadcastConflict,

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("no session cookie in login response")]
    MissingCookie,

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}
