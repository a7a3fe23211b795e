//! Infrastructure layer: transports and the session task that drives them.
//!
//! - [`transport`] – the `Connector` / `Connection` seam.
//! - [`websocket`] – production transport over `tokio-tungstenite`.
//! - [`memory`]    – in-process transport with a scriptable server end.
//! - `session`     – the background task owning connection and state.

pub mod memory;
pub(crate) mod session;
pub mod transport;
pub mod websocket;

pub use memory::{memory_transport, MemoryConnector, MemoryServer, ServerEnd};
pub use transport::{Connection, Connector};
pub use websocket::WebSocketConnector;
