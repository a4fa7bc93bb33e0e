//! HTTP client for the livestreamer server.

mod error;
pub mod pacing;

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use reqwest::{header, StatusCode};
use tokio::sync::mpsc;

use shared::{CreateSessionRequest, SessionUser, StreamStatusResponse};

pub use error::ClientError;

const SESSION_COOKIE: &str = "SESSIONID";

pub struct LivestreamerClient {
    http: reqwest::Client,
    base_url: String,
    cookie: Option<String>,
}

impl LivestreamerClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie: None,
        }
    }

    /// `SESSIONID=<token>`, once logged in.
    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    /// POST /session and keep the returned cookie for later requests.
    pub async fn login(&mut self, login: &str, password: &str) -> Result<SessionUser, ClientError> {
        let res = self
            .http
            .post(format!("{}/session", self.base_url))
            .json(&CreateSessionRequest {
                login: login.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        let res = check(res).await?;
        let cookie = res
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(session_cookie_pair)
            .ok_or(ClientError::MissingCookie)?;
        let user = res.json::<SessionUser>().await?;
        tracing::debug!("Logged in");
        self.cookie = Some(cookie);
        Ok(user)
    }

    /// Stream `body` to POST /stream/push. Resolves when the server has consumed it.
    pub async fn push<S>(&self, body: S) -> Result<(), ClientError>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(4);
        let pump = tokio::spawn(async move {
            let mut body = std::pin::pin!(body);
            while let Some(chunk) = body.next().await {
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        let mut req = self
            .http
            .post(format!("{}/stream/push", self.base_url))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(ChannelBody(rx)));
        if let Some(cookie) = &self.cookie {
            req = req.header(header::COOKIE, cookie);
        }
        let result = match req.send().await {
            Ok(res) => check(res).await.map(|_| ()),
            Err(e) => Err(e.into()),
        };
        pump.abort();
        result
    }

    /// GET /stream as a byte stream.
    pub async fn listen(
        &self,
    ) -> Result<impl Stream<Item = Result<Bytes, ClientError>>, ClientError> {
        let res = self
            .http
            .get(format!("{}/stream", self.base_url))
            .send()
            .await?;
        let res = check(res).await?;
        Ok(res.bytes_stream().map_err(ClientError::from))
    }

    pub async fn status(&self) -> Result<StreamStatusResponse, ClientError> {
        let res = self
            .http
            .get(format!("{}/stream/status", self.base_url))
            .send()
            .await?;
        Ok(check(res).await?.json().await?)
    }

    /// WebSocket URL of the server's event feed.
    pub fn ws_url(&self) -> String {
        let ws_base = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/ws", ws_base)
    }
}

/// Request body fed by the pump task.
struct ChannelBody(mpsc::Receiver<std::io::Result<Bytes>>);

impl Stream for ChannelBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_recv(cx)
    }
}

async fn check(res: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    match res.status() {
        s if s.is_success() => Ok(res),
        StatusCode::UNAUTHORIZED => Err(ClientError::Unauthorized),
        StatusCode::FORBIDDEN => Err(ClientError::Forbidden),
        StatusCode::CONFLICT => Err(ClientError::BroadcastConflict),
        s => Err(ClientError::Status {
            status: s.as_u16(),
            body: res.text().await.unwrap_or_default(),
        }),
    }
}

/// `SESSIONID=<token>` from a Set-Cookie value.
fn session_cookie_pair(set_cookie: &str) -> Option<String> {
    let pair = set_cookie.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    (name == SESSION_COOKIE && !value.is_empty()).then(|| pair.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_follows_scheme() {
        assert_eq!(
            LivestreamerClient::new("http://radio:8080/").ws_url(),
            "ws://radio:8080/ws"
        );
        assert_eq!(
            LivestreamerClient::new("https://radio.example").ws_url(),
            "wss://radio.example/ws"
        );
    }

    #[test]
    fn session_cookie_pair_extracts_token() {
        assert_eq!(
            session_cookie_pair("SESSIONID=abc; HttpOnly; Path=/; Max-Age=60").as_deref(),
            Some("SESSIONID=abc")
        );
        assert!(session_cookie_pair("SESSIONID=; Max-Age=0").is_none());
        assert!(session_cookie_pair("theme=dark").is_none());
    }

    #[test]
    fn new_client_has_no_cookie() {
        assert!(LivestreamerClient::new("http://radio").cookie().is_none());
    }
}
