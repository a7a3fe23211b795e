//! Domain layer for the Kilovolt client.
//!
//! Pure types with no I/O and no async: the wire messages, the client
//! configuration and the lifecycle notifications.  Everything here can be
//! built and inspected in a plain `#[test]`.

pub mod config;
pub mod events;
pub mod messages;

pub use config::{AuthMode, ClientOptions, ConfigError, DEFAULT_ADDRESS};
pub use events::{ConnectionState, DisconnectReason, ErrorEvent, EventHandlers};
pub use messages::{Command, ErrorFrame, Push, Reply, Request, Response, ServerMessage};
