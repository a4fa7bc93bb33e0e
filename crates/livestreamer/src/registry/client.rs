//! Registry client entry.

use std::fmt;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use shared::{DeletedClient, SanitizedClient, WsEnvelope};

/// Outbound half of a client's WebSocket, drained by the socket writer task.
///
/// Bounded: when the writer falls behind, new messages for this client are dropped.
#[derive(Clone)]
pub struct ClientSocket {
    tx: mpsc::Sender<WsEnvelope>,
}

impl ClientSocket {
    pub fn new(tx: mpsc::Sender<WsEnvelope>) -> Self {
        Self { tx }
    }

    /// Socket plus the receiver its writer task should drain.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<WsEnvelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a message without waiting. Returns `false` if it was dropped.
    pub fn send(&self, envelope: WsEnvelope) -> bool {
        match self.tx.try_send(envelope) {
            Ok(()) => true,
            Err(TrySendError::Full(env)) => {
                tracing::debug!(kind = %env.r#type, "Client queue full, message dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the writer side has dropped its receiver.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

impl PartialEq for ClientSocket {
    fn eq(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

impl fmt::Debug for ClientSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSocket")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// A connected WebSocket client.
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    /// Id of the authenticated user behind the socket
    pub id: i64,
    /// Per-connection key
    pub uuid: Uuid,
    pub username: String,
    pub socket: ClientSocket,
}

impl Client {
    pub fn sanitized(&self) -> SanitizedClient {
        SanitizedClient {
            uuid: self.uuid,
            username: self.username.clone(),
        }
    }

    pub(super) fn deleted(&self) -> DeletedClient {
        DeletedClient {
            uuid: self.uuid,
            username: self.username.clone(),
            id: self.id,
        }
    }
}
