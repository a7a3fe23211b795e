//! Authentication handshake.
//!
//! Runs once per successful transport open, before the client is declared
//! usable.  Two mutually exclusive modes:
//!
//! ```text
//! Password mode                          Interactive mode
//! ─────────────                          ────────────────
//! → klogin {auth:"challenge"}            → klogin {…interactive_data, auth:"ask"}
//! ← {challenge, salt}   (base64)         ← ok  (server verified out of band)
//! → kauth {hash}
//! ← ok
//! ```
//!
//! `hash = base64(HMAC-SHA256(key = UTF8(password) ‖ salt, msg = challenge))`
//! with `salt` and `challenge` base64-decoded first.
//!
//! Any error reply aborts the handshake with [`KilovoltError::Auth`]; the
//! session treats that as fatal and closes the connection.

use async_trait::async_trait;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::Sha256;
use tracing::{debug, error};

use crate::domain::config::AuthMode;
use crate::domain::messages::{Command, Reply, Request};
use crate::error::{KilovoltError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Standard alphabet, tolerant of non-zero trailing bits and missing padding.
/// Servers are not consistent about either.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Sends one request during the handshake and waits for its reply.
///
/// The session implements this directly on the freshly opened connection,
/// before the connection is published to callers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestExchange: Send {
    async fn exchange(&mut self, request: Request) -> Result<Reply>;
}

#[derive(Debug, Deserialize)]
struct Challenge {
    challenge: String,
    salt: String,
}

/// Computes the signed response to a password challenge.
///
/// # Errors
///
/// Returns [`KilovoltError::Auth`] if `challenge` or `salt` is not base64.
pub fn challenge_hash(password: &str, challenge: &str, salt: &str) -> Result<String> {
    let salt_bytes = LENIENT_BASE64
        .decode(salt)
        .map_err(|e| KilovoltError::Auth(format!("invalid salt encoding: {e}")))?;
    let challenge_bytes = LENIENT_BASE64
        .decode(challenge)
        .map_err(|e| KilovoltError::Auth(format!("invalid challenge encoding: {e}")))?;

    let mut key = password.as_bytes().to_vec();
    key.extend_from_slice(&salt_bytes);

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| KilovoltError::Auth(format!("invalid HMAC key: {e}")))?;
    mac.update(&challenge_bytes);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// The interactive login payload: caller data with the `ask` marker on top.
pub fn interactive_login_data(data: &Map<String, Value>) -> Value {
    let mut payload = data.clone();
    payload.insert("auth".to_string(), Value::from("ask"));
    Value::Object(payload)
}

/// Runs the handshake selected by `mode` over `exchange`.
///
/// [`AuthMode::None`] succeeds without sending anything.
///
/// # Errors
///
/// [`KilovoltError::Auth`] when the server rejects a step or sends a
/// malformed challenge; transport errors from `exchange` pass through.
pub async fn authenticate<E>(mode: &AuthMode, exchange: &mut E) -> Result<()>
where
    E: RequestExchange + ?Sized,
{
    match mode {
        AuthMode::None => Ok(()),
        AuthMode::Password(password) => {
            let reply = exchange
                .exchange(Request::new(Command::Login, json!({ "auth": "challenge" })))
                .await?;
            let data = accepted(reply)?;
            let challenge: Challenge = serde_json::from_value(data)
                .map_err(|e| KilovoltError::Auth(format!("malformed challenge: {e}")))?;

            let hash = challenge_hash(password, &challenge.challenge, &challenge.salt)?;
            let reply = exchange
                .exchange(Request::new(Command::Auth, json!({ "hash": hash })))
                .await?;
            accepted(reply)?;
            debug!("password authentication succeeded");
            Ok(())
        }
        AuthMode::Interactive(data) => {
            let reply = exchange
                .exchange(Request::new(Command::Login, interactive_login_data(data)))
                .await?;
            accepted(reply)?;
            debug!("interactive authentication succeeded");
            Ok(())
        }
    }
}

fn accepted(reply: Reply) -> Result<Value> {
    match reply {
        Reply::Response(r) if r.ok => Ok(r.data),
        Reply::Response(_) => {
            error!("kilovolt auth error: server rejected the request");
            Err(KilovoltError::Auth("server rejected the request".to_string()))
        }
        Reply::Error(e) => {
            error!("kilovolt auth error: {}", e.error);
            Err(KilovoltError::Auth(e.error))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
