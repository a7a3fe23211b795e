//! Connection lifecycle notifications.
//!
//! Observers register one callback per named channel (open, close, error,
//! state change) on an [`EventHandlers`] value passed to the client at
//! construction time.  Callbacks run on the client's session task and must
//! not block.
//!
//! ```rust
//! use kilovolt::domain::EventHandlers;
//!
//! let handlers = EventHandlers::new()
//!     .on_open(|| println!("ready"))
//!     .on_error(|e| eprintln!("kilovolt error: {e}"));
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Lifecycle state of the client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection.  Initial state, and the state after any drop.
    Disconnected,
    /// Transport handshake, authentication and resubscription in progress.
    Connecting,
    /// Authenticated and usable.
    Open,
    /// `close()` was requested and the transport is being torn down.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Why the connection went away.
#[derive(Debug, Clone, PartialEq)]
pub struct DisconnectReason {
    pub message: String,
    /// `true` when the client itself requested the close.
    pub requested: bool,
}

impl DisconnectReason {
    pub fn remote(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            requested: false,
        }
    }

    pub fn requested() -> Self {
        Self {
            message: "connection closed by client".to_string(),
            requested: true,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Payload of the error channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorEvent {
    /// Connection-level failure.
    Transport(String),
    /// A frame carrying an `error` field.
    Protocol {
        message: String,
        request_id: Option<String>,
        details: Option<Value>,
    },
    /// The handshake was rejected; the session has been closed.
    Auth(String),
}

impl fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorEvent::Transport(msg) => write!(f, "transport error: {msg}"),
            ErrorEvent::Protocol {
                message,
                request_id: Some(id),
                ..
            } => write!(f, "protocol error (request {id}): {message}"),
            ErrorEvent::Protocol { message, .. } => write!(f, "protocol error: {message}"),
            ErrorEvent::Auth(msg) => write!(f, "authentication error: {msg}"),
        }
    }
}

pub type OnOpenCallback = Arc<dyn Fn() + Send + Sync>;
pub type OnCloseCallback = Arc<dyn Fn(&DisconnectReason) + Send + Sync>;
pub type OnErrorCallback = Arc<dyn Fn(&ErrorEvent) + Send + Sync>;
pub type OnStateChangeCallback = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Named-channel observer registrations.  Every channel is optional.
#[derive(Clone, Default)]
pub struct EventHandlers {
    on_open: Option<OnOpenCallback>,
    on_close: Option<OnCloseCallback>,
    on_error: Option<OnErrorCallback>,
    on_state_change: Option<OnStateChangeCallback>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fired once the connection is authenticated and resubscribed.
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Fired for transport, protocol and authentication errors.  Protocol
    /// errors are broadcast here even when they also resolve a request.
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ErrorEvent) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_open(&self) {
        if let Some(cb) = &self.on_open {
            cb();
        }
    }

    pub(crate) fn emit_close(&self, reason: &DisconnectReason) {
        if let Some(cb) = &self.on_close {
            cb(reason);
        }
    }

    pub(crate) fn emit_error(&self, event: &ErrorEvent) {
        if let Some(cb) = &self.on_error {
            cb(event);
        }
    }

    pub(crate) fn emit_state_change(&self, state: ConnectionState) {
        if let Some(cb) = &self.on_state_change {
            cb(state);
        }
    }
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_state_change", &self.on_state_change.is_some())
            .finish()
    }
}
