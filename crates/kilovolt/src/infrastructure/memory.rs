//! In-process transport with a scriptable server end.
//!
//! [`memory_transport`] returns a connector for the client and a
//! [`MemoryServer`] that hands out one [`ServerEnd`] per accepted
//! connection.  The server end reads raw frames or decoded requests and
//! writes whatever frames a test wants, including malformed ones.
//!
//! ```rust,no_run
//! # async fn demo() {
//! use std::sync::Arc;
//! use kilovolt::{ClientOptions, EventHandlers, Kilovolt};
//! use kilovolt::infrastructure::memory::memory_transport;
//!
//! let (connector, mut server) = memory_transport();
//! let client = Kilovolt::with_transport(
//!     ClientOptions::default(),
//!     EventHandlers::new(),
//!     Arc::new(connector),
//! );
//! let connecting = client.connect();
//! let mut end = server.accept().await.unwrap();
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use super::transport::{Connection, Connector};
use crate::domain::messages::Request;
use crate::error::TransportError;

type Frame = Result<String, TransportError>;

#[derive(Debug, Default)]
struct Shared {
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

/// Creates a connected connector/server pair.
pub fn memory_transport() -> (MemoryConnector, MemoryServer) {
    let shared = Arc::new(Shared::default());
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (
        MemoryConnector {
            shared: shared.clone(),
            accept_tx,
        },
        MemoryServer { shared, accept_rx },
    )
}

/// Client-side half of [`memory_transport`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
    accept_tx: mpsc::UnboundedSender<ServerEnd>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, address: &str) -> Result<Box<dyn Connection>, TransportError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let end = ServerEnd {
            incoming: to_server_rx,
            outgoing: to_client_tx,
        };
        self.accept_tx
            .send(end)
            .map_err(|_| TransportError::Connect {
                address: address.to_string(),
                reason: "server is gone".to_string(),
            })?;
        debug!("memory connection to {address} opened");

        Ok(Box::new(MemoryConnection {
            outgoing: Some(to_server_tx),
            incoming: to_client_rx,
        }))
    }
}

struct MemoryConnection {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    incoming: mpsc::UnboundedReceiver<Frame>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let tx = self.outgoing.as_ref().ok_or(TransportError::Closed)?;
        tx.send(text).map_err(|_| TransportError::Closed)
    }

    async fn next_text(&mut self) -> Option<Frame> {
        self.incoming.recv().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outgoing = None;
        self.incoming.close();
        Ok(())
    }
}

/// Accepts connections opened through the paired [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryServer {
    shared: Arc<Shared>,
    accept_rx: mpsc::UnboundedReceiver<ServerEnd>,
}

impl MemoryServer {
    /// Waits for the next client connection.
    pub async fn accept(&mut self) -> Option<ServerEnd> {
        self.accept_rx.recv().await
    }

    /// Makes subsequent connection attempts fail.
    pub fn set_refuse(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Number of connection attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// The server side of one memory connection.  Dropping it disconnects the
/// client.
#[derive(Debug)]
pub struct ServerEnd {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<Frame>,
}

impl ServerEnd {
    /// Next raw frame from the client, or `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }

    /// Next frame from the client, decoded as a request.
    ///
    /// Returns `None` on close or if the frame is not a valid request.
    pub async fn recv_request(&mut self) -> Option<Request> {
        let frame = self.recv().await?;
        serde_json::from_str(&frame).ok()
    }

    /// Writes a raw frame to the client.  Returns `false` if the client is gone.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.outgoing.send(Ok(frame.into())).is_ok()
    }

    /// Sends a successful response carrying `data`.
    pub fn respond(&self, request_id: &str, data: Value) -> bool {
        self.send(
            json!({"type": "response", "ok": true, "request_id": request_id, "data": data})
                .to_string(),
        )
    }

    /// Sends a push notification for `key`.
    pub fn push(&self, key: &str, new_value: &str) -> bool {
        self.send(json!({"type": "push", "key": key, "new_value": new_value}).to_string())
    }

    /// Sends an error frame, optionally tied to a request.
    pub fn error(&self, request_id: Option<&str>, message: &str) -> bool {
        let frame = match request_id {
            Some(id) => json!({"error": message, "request_id": id}),
            None => json!({"error": message}),
        };
        self.send(frame.to_string())
    }

    /// Delivers a transport failure to the client's reader.
    pub fn fail(&self, reason: &str) -> bool {
        debug!("memory connection failing: {reason}");
        self.outgoing.send(Err(TransportError::Closed)).is_ok()
    }
}
