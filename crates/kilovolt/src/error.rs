//! Error types shared by every layer of the client.

use thiserror::Error;

use crate::domain::messages::Command;

/// Failures of the underlying duplex connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    /// The WebSocket layer reported an error on an established connection.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The remote side went away.
    #[error("connection closed")]
    Closed,

    /// A binary frame was not valid UTF-8 text.
    #[error("received a binary frame that is not valid UTF-8")]
    InvalidUtf8,
}

/// Every failure a public client operation can report.
#[derive(Debug, Error)]
pub enum KilovoltError {
    /// The request was issued while the client was not open.  No frame was sent.
    #[error("not connected to server")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with an error-tagged reply.
    #[error("server error: {message}")]
    Server { message: String },

    /// The authentication handshake failed.  The session has been closed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A JSON convenience call could not encode or decode its value.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A reply's payload did not have the shape its command implies.
    #[error("unexpected payload for {command}: {source}")]
    UnexpectedPayload {
        command: Command,
        #[source]
        source: serde_json::Error,
    },

    #[error("request {request_id} timed out")]
    Timeout { request_id: String },

    /// The connection was torn down before the reply arrived.
    #[error("connection closed before a reply was received")]
    ConnectionClosed,

    /// The client's session task is gone.
    #[error("client is no longer running")]
    ClientStopped,

    /// A caller-supplied request id is already waiting on a reply.
    #[error("request id {0} is already in flight")]
    DuplicateRequestId(String),
}

pub type Result<T, E = KilovoltError> = std::result::Result<T, E>;
