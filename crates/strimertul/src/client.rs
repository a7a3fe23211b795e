//! The `Strimertul` façade: one Kilovolt connection with the Twitch and
//! loyalty accessors bound to it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use kilovolt::infrastructure::Connector;
use kilovolt::{ClientOptions, EventHandlers, Kilovolt, Result, DEFAULT_ADDRESS};

use crate::loyalty::Loyalty;
use crate::twitch::Twitch;

/// Connection and authentication settings for a strimertul instance.
///
/// Reconnection is always on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrimertulOptions {
    /// Address including the path.  Defaults to `ws://localhost:4337/ws`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Authenticate non-interactively as soon as the connection opens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Authenticate interactively as soon as the connection opens.
    #[serde(default)]
    pub interactive: bool,

    /// Added to the interactive auth message.
    #[serde(default)]
    pub interactive_data: Map<String, Value>,
}

impl From<StrimertulOptions> for ClientOptions {
    fn from(options: StrimertulOptions) -> Self {
        ClientOptions {
            address: options
                .address
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            reconnect: true,
            password: options.password,
            interactive: options.interactive,
            interactive_data: options.interactive_data,
            ..ClientOptions::default()
        }
    }
}

/// Strimertul client.
///
/// Cloning is cheap; clones share the connection.
#[derive(Clone)]
pub struct Strimertul {
    kv: Kilovolt,
    /// Twitch-related functions.
    pub twitch: Twitch,
    /// Loyalty system functions.
    pub loyalty: Loyalty,
}

impl Strimertul {
    /// Creates a client over WebSocket.  Nothing is sent until [`connect`].
    ///
    /// [`connect`]: Strimertul::connect
    pub fn new(options: StrimertulOptions) -> Self {
        Self::from_kv(Kilovolt::new(options.into()))
    }

    /// Creates a client on an arbitrary transport.
    pub fn with_transport(
        options: StrimertulOptions,
        handlers: EventHandlers,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::from_kv(Kilovolt::with_transport(options.into(), handlers, connector))
    }

    fn from_kv(kv: Kilovolt) -> Self {
        Self {
            twitch: Twitch::new(kv.clone()),
            loyalty: Loyalty::new(kv.clone()),
            kv,
        }
    }

    /// Connects and authenticates.  Await this before using the accessors.
    pub async fn connect(&self) -> Result<()> {
        self.kv.connect().await
    }

    /// Closes the connection for good.
    pub async fn close(&self) -> Result<()> {
        self.kv.close().await
    }

    /// The underlying Kilovolt client, for raw key access.
    pub fn kv(&self) -> &Kilovolt {
        &self.kv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_address_falls_back_to_default() {
        // Arrange
        let options = StrimertulOptions {
            password: Some("hunter2".into()),
            ..StrimertulOptions::default()
        };

        // Act
        let client: ClientOptions = options.into();

        // Assert
        assert_eq!(client.address, DEFAULT_ADDRESS);
        assert!(client.reconnect);
        assert_eq!(client.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn test_empty_address_counts_as_missing() {
        let client: ClientOptions = StrimertulOptions {
            address: Some(String::new()),
            ..StrimertulOptions::default()
        }
        .into();

        assert_eq!(client.address, DEFAULT_ADDRESS);
    }

    #[test]
    fn test_options_deserialize_from_json() {
        let options: StrimertulOptions = serde_json::from_value(json!({
            "address": "ws://stream-pc:4337/ws",
            "interactive": true,
            "interactive_data": {"name": "overlay"}
        }))
        .unwrap();

        let client: ClientOptions = options.into();

        assert_eq!(client.address, "ws://stream-pc:4337/ws");
        assert!(client.interactive);
        assert_eq!(client.interactive_data["name"], json!("overlay"));
    }
}
