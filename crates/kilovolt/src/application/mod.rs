//! Application layer: the protocol logic that sits between the typed API and
//! the wire.
//!
//! Nothing here touches a socket.  [`auth`] drives the login handshake over
//! any [`auth::RequestExchange`], [`correlator`] matches replies to pending
//! requests, and [`registry`] owns the local subscription tables.

pub mod auth;
pub mod correlator;
pub mod registry;

pub use auth::{authenticate, challenge_hash, RequestExchange};
pub use correlator::{assign_request_id, new_request_id, Completion, Correlator};
pub use registry::{
    push_handler, PushHandler, RegistrySnapshot, Removal, SubscriptionRegistry,
    SubscriptionTarget,
};
