//! The duplex text transport the session runs on.
//!
//! A [`Connector`] opens a [`Connection`]; the connection carries whole
//! text frames in both directions.  Framing inside a text frame (several
//! newline-separated JSON values) is the session's business, not the
//! transport's.
//!
//! Two implementations ship with the crate:
//!
//! - [`super::websocket::WebSocketConnector`] for real servers.
//! - [`super::memory::memory_transport`] for tests and embedding, with a
//!   scriptable server end.

use async_trait::async_trait;

use crate::error::TransportError;

/// One open connection.
#[async_trait]
pub trait Connection: Send {
    /// Writes one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Waits for the next text frame.
    ///
    /// Returns `None` once the remote side has closed the connection.
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;

    /// Closes the connection.  Idempotent.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens connections to a server address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Box<dyn Connection>, TransportError>;
}
