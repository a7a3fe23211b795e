//! # kilovolt
//!
//! Typed async client for Kilovolt, the key-value pub/sub protocol spoken
//! by strimertul.  One client holds one duplex connection and multiplexes
//! request/response calls and push notifications over it.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Caller
//!   ↕  Kilovolt handle (client)            get / put / delete / list / subscribe
//! [kilovolt]
//!   ├── domain/          Pure types: wire messages, ClientOptions, lifecycle events
//!   ├── application/     Protocol logic: auth handshake, correlator, subscription registry
//!   └── infrastructure/
//!         ├── transport  Connector / Connection traits
//!         ├── websocket  tokio-tungstenite transport
//!         ├── memory     in-process transport for tests
//!         └── session    background task owning connection + state
//! ```
//!
//! # Layer rules
//!
//! - `domain` performs no I/O and is not async.
//! - `application` depends on `domain` only; its one async seam
//!   (`RequestExchange`) is a trait, so it is tested with mocks.
//! - `infrastructure` wires both to Tokio and the network.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use kilovolt::{ClientOptions, Kilovolt};
//!
//! # async fn demo() -> kilovolt::Result<()> {
//! let client = Kilovolt::new(ClientOptions {
//!     password: Some("hunter2".into()),
//!     ..ClientOptions::default()
//! });
//! client.connect().await?;
//! let keys = client.key_list(Some("twitch/")).await?;
//! # Ok(())
//! # }
//! ```

pub mod application;
pub mod client;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use application::registry::{push_handler, PushHandler, RegistrySnapshot};
pub use client::Kilovolt;
pub use domain::config::{AuthMode, ClientOptions, ConfigError, DEFAULT_ADDRESS};
pub use domain::events::{ConnectionState, DisconnectReason, ErrorEvent, EventHandlers};
pub use domain::messages::{Command, ErrorFrame, Push, Reply, Request, Response};
pub use error::{KilovoltError, Result, TransportError};
