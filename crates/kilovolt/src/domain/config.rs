//! Client configuration.
//!
//! [`ClientOptions`] is the single source of truth for how a client connects
//! and authenticates.  It is a plain struct with serde defaults so it can be
//! built in code or loaded from a TOML file:
//!
//! ```toml
//! address = "ws://localhost:4337/ws"
//! reconnect = true
//! reconnect_delay_secs = 5
//! password = "hunter2"
//! ```
//!
//! Fields absent from the file fall back to the defaults below, so an empty
//! file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Default server endpoint.
pub const DEFAULT_ADDRESS: &str = "ws://localhost:4337/ws";

/// Fixed delay between a connection drop and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// Both password and interactive authentication were requested.
    #[error("password and interactive authentication are mutually exclusive")]
    ConflictingAuth,
}

/// How the client proves itself to the server after the transport opens.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthMode {
    /// The server has no auth requirement.
    None,
    /// HMAC challenge-response with a shared password.
    Password(String),
    /// Out-of-band verification; the map is merged into the login payload.
    Interactive(Map<String, Value>),
}

/// All runtime configuration for a Kilovolt client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// WebSocket endpoint, including the path.
    #[serde(default = "default_address")]
    pub address: String,

    /// Reconnect automatically after the connection drops.
    ///
    /// `close()` turns this off for the lifetime of the client.
    #[serde(default = "default_true")]
    pub reconnect: bool,

    /// Seconds to wait before reconnecting.  Fixed, not exponential.
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Authenticate non-interactively with this password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Authenticate interactively (the server asks its operator).
    #[serde(default)]
    pub interactive: bool,

    /// Extra fields added to the interactive login message.
    #[serde(default)]
    pub interactive_data: Map<String, Value>,

    /// Give up on a request after this many seconds.  `None` waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_true() -> bool {
    true
}

fn default_reconnect_delay_secs() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_secs()
}

impl Default for ClientOptions {
    /// | Field                | Default                  |
    /// |----------------------|--------------------------|
    /// | address              | `ws://localhost:4337/ws` |
    /// | reconnect            | `true`                   |
    /// | reconnect_delay_secs | `5`                      |
    /// | password             | none                     |
    /// | interactive          | `false`                  |
    /// | request_timeout_secs | none                     |
    fn default() -> Self {
        Self {
            address: default_address(),
            reconnect: true,
            reconnect_delay_secs: default_reconnect_delay_secs(),
            password: None,
            interactive: false,
            interactive_data: Map::new(),
            request_timeout_secs: None,
        }
    }
}

impl ClientOptions {
    /// Options for `address` with every other field at its default.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Parses and validates options from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::ConflictingAuth`] if both auth modes are set.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let options: ClientOptions = toml::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Reads, parses and validates options from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise the
    /// same errors as [`ClientOptions::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Rejects configurations that request both auth modes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.password.is_some() && self.interactive {
            return Err(ConfigError::ConflictingAuth);
        }
        Ok(())
    }

    /// The authentication mode implied by these options.
    ///
    /// A password wins over `interactive` when both are set in code.
    pub fn auth_mode(&self) -> AuthMode {
        if let Some(password) = &self.password {
            AuthMode::Password(password.clone())
        } else if self.interactive {
            AuthMode::Interactive(self.interactive_data.clone())
        } else {
            AuthMode::None
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
