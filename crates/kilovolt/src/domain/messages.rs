//! Wire message types for the Kilovolt protocol.
//!
//! Kilovolt speaks newline-delimited JSON over a message-oriented duplex
//! connection (a WebSocket in production).  A single transport frame may
//! carry several JSON values separated by `\n`; [`split_frame`] yields them
//! in order.
//!
//! # Message flow
//!
//! ```text
//! Client → Server:  Request            {"command":"kget","data":{"key":"foo"},"request_id":"…"}
//! Server → Client:  ServerMessage      one of Response / Push / Error
//! ```
//!
//! # Decoding
//!
//! Inbound frames are decoded exactly once, at the frame boundary, into the
//! [`ServerMessage`] sum type.  An `error` field takes precedence over the
//! `type` discriminant: a frame that carries both is an [`ErrorFrame`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ── Client → Server ───────────────────────────────────────────────────────────

/// Every command the client can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Start authentication (`challenge` or interactive `ask`).
    #[serde(rename = "klogin")]
    Login,
    /// Complete password authentication with the signed challenge.
    #[serde(rename = "kauth")]
    Auth,
    #[serde(rename = "kget")]
    Get,
    #[serde(rename = "kget-bulk")]
    GetBulk,
    #[serde(rename = "kget-all")]
    GetAll,
    #[serde(rename = "kset")]
    Set,
    #[serde(rename = "kset-bulk")]
    SetBulk,
    #[serde(rename = "kdel")]
    Delete,
    #[serde(rename = "klist")]
    List,
    #[serde(rename = "ksub")]
    Subscribe,
    #[serde(rename = "kunsub")]
    Unsubscribe,
    #[serde(rename = "ksub-prefix")]
    SubscribePrefix,
    #[serde(rename = "kunsub-prefix")]
    UnsubscribePrefix,
}

impl Command {
    /// The command name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Login => "klogin",
            Command::Auth => "kauth",
            Command::Get => "kget",
            Command::GetBulk => "kget-bulk",
            Command::GetAll => "kget-all",
            Command::Set => "kset",
            Command::SetBulk => "kset-bulk",
            Command::Delete => "kdel",
            Command::List => "klist",
            Command::Subscribe => "ksub",
            Command::Unsubscribe => "kunsub",
            Command::SubscribePrefix => "ksub-prefix",
            Command::UnsubscribePrefix => "kunsub-prefix",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound request.
///
/// `request_id` is normally left empty and assigned by the correlator just
/// before the frame is written.  A caller-supplied id is kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: Command,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Request {
    /// Builds a request with no id yet.
    pub fn new(command: Command, data: Value) -> Self {
        Self {
            command,
            data,
            request_id: None,
        }
    }

    /// Builds a request carrying a caller-chosen id.
    pub fn with_id(command: Command, data: Value, request_id: impl Into<String>) -> Self {
        Self {
            command,
            data,
            request_id: Some(request_id.into()),
        }
    }

    /// Serializes the request as one wire frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn get(key: &str) -> Self {
        Self::new(Command::Get, object([("key", Value::from(key))]))
    }

    pub fn get_bulk(keys: &[String]) -> Self {
        Self::new(Command::GetBulk, object([("keys", Value::from(keys.to_vec()))]))
    }

    pub fn get_all(prefix: &str) -> Self {
        Self::new(Command::GetAll, object([("prefix", Value::from(prefix))]))
    }

    pub fn set(key: &str, data: &str) -> Self {
        Self::new(
            Command::Set,
            object([("key", Value::from(key)), ("data", Value::from(data))]),
        )
    }

    /// `kset-bulk` sends the key → value map as the request data itself.
    pub fn set_bulk<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let data: Map<String, Value> = entries
            .into_iter()
            .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
            .collect();
        Self::new(Command::SetBulk, Value::Object(data))
    }

    pub fn delete(key: &str) -> Self {
        Self::new(Command::Delete, object([("key", Value::from(key))]))
    }

    /// An empty prefix lists every key.
    pub fn list(prefix: Option<&str>) -> Self {
        Self::new(
            Command::List,
            object([("prefix", Value::from(prefix.unwrap_or("")))]),
        )
    }

    pub fn subscribe(key: &str) -> Self {
        Self::new(Command::Subscribe, object([("key", Value::from(key))]))
    }

    pub fn unsubscribe(key: &str) -> Self {
        Self::new(Command::Unsubscribe, object([("key", Value::from(key))]))
    }

    pub fn subscribe_prefix(prefix: &str) -> Self {
        Self::new(
            Command::SubscribePrefix,
            object([("prefix", Value::from(prefix))]),
        )
    }

    pub fn unsubscribe_prefix(prefix: &str) -> Self {
        Self::new(
            Command::UnsubscribePrefix,
            object([("prefix", Value::from(prefix))]),
        )
    }
}

fn object<const N: usize>(fields: [(&str, Value); N]) -> Value {
    Value::Object(
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

// ── Server → Client ───────────────────────────────────────────────────────────

/// A successful reply to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: String,
    /// The server's success flag.  Absent on older servers, in which case a
    /// `response` frame is taken as success.
    #[serde(default = "default_ok")]
    pub ok: bool,
    /// Command-dependent payload: string, string map, string array or nothing.
    #[serde(default)]
    pub data: Value,
}

fn default_ok() -> bool {
    true
}

/// A server-initiated notification that `key` changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Push {
    pub key: String,
    pub new_value: String,
}

/// A protocol-level error, optionally tied to a pending request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Every frame the server can send, decoded once at the frame boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Response(Response),
    Push(Push),
    Error(ErrorFrame),
}

// `untagged` tries `Error` first, so a frame with an `error` field is always
// an error regardless of its `type`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawServerMessage {
    Error(ErrorFrame),
    Tagged(TaggedServerMessage),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum TaggedServerMessage {
    Response(Response),
    Push(Push),
}

impl ServerMessage {
    /// Decodes one JSON value from the wire.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] for malformed JSON or an unknown `type`.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let raw: RawServerMessage = serde_json::from_str(text)?;
        Ok(match raw {
            RawServerMessage::Error(e) => ServerMessage::Error(e),
            RawServerMessage::Tagged(TaggedServerMessage::Response(r)) => {
                ServerMessage::Response(r)
            }
            RawServerMessage::Tagged(TaggedServerMessage::Push(p)) => ServerMessage::Push(p),
        })
    }
}

/// What a pending request eventually resolves to.
///
/// An error frame that references the request resolves it with
/// [`Reply::Error`], so the waiting caller never hangs on a server-side
/// failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Response(Response),
    Error(ErrorFrame),
}

/// Splits one transport frame into its JSON segments.
///
/// Segments are trimmed; empty ones are discarded.  Order is preserved.
pub fn split_frame(frame: &str) -> impl Iterator<Item = &str> {
    frame.split('\n').map(str::trim).filter(|s| !s.is_empty())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serializes_command_name_and_id() {
        // Arrange
        let req = Request::with_id(Command::GetBulk, json!({"keys": ["a"]}), "r1");

        // Act
        let value: Value = serde_json::from_str(&req.to_frame().unwrap()).unwrap();

        // Assert
        assert_eq!(
            value,
            json!({"command": "kget-bulk", "data": {"keys": ["a"]}, "request_id": "r1"})
        );
    }

    #[test]
    fn test_command_as_str_matches_serde_name() {
        for cmd in [
            Command::Login,
            Command::Auth,
            Command::Get,
            Command::GetBulk,
            Command::GetAll,
            Command::Set,
            Command::SetBulk,
            Command::Delete,
            Command::List,
            Command::Subscribe,
            Command::Unsubscribe,
            Command::SubscribePrefix,
            Command::UnsubscribePrefix,
        ] {
            let serialized = serde_json::to_value(cmd).unwrap();
            assert_eq!(serialized, Value::from(cmd.as_str()));
        }
    }

    #[test]
    fn test_list_without_prefix_sends_empty_prefix() {
        let req = Request::list(None);
        assert_eq!(req.data, json!({"prefix": ""}));
    }

    #[test]
    fn test_set_bulk_uses_map_as_data() {
        let mut entries = std::collections::BTreeMap::new();
        entries.insert("a".to_string(), "1".to_string());
        entries.insert("b".to_string(), "2".to_string());

        let req = Request::set_bulk(&entries);

        assert_eq!(req.command, Command::SetBulk);
        assert_eq!(req.data, json!({"a": "1", "b": "2"}));
    }

    #[test]
    fn test_decode_response() {
        let msg =
            ServerMessage::decode(r#"{"type":"response","request_id":"r1","data":"bar"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Response(Response {
                request_id: "r1".into(),
                ok: true,
                data: json!("bar"),
            })
        );
    }

    #[test]
    fn test_decode_response_without_data_is_null() {
        let msg = ServerMessage::decode(r#"{"type":"response","request_id":"r1","ok":true}"#)
            .unwrap();
        match msg {
            ServerMessage::Response(r) => assert_eq!(r.data, Value::Null),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_decode_push() {
        let msg =
            ServerMessage::decode(r#"{"type":"push","key":"foo","new_value":"bar"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Push(Push {
                key: "foo".into(),
                new_value: "bar".into(),
            })
        );
    }

    #[test]
    fn test_decode_error_with_and_without_request_id() {
        let with_id = ServerMessage::decode(r#"{"error":"bad key","request_id":"r1"}"#).unwrap();
        let without_id = ServerMessage::decode(r#"{"error":"boom"}"#).unwrap();

        assert!(matches!(
            with_id,
            ServerMessage::Error(ErrorFrame { ref request_id, .. }) if request_id.as_deref() == Some("r1")
        ));
        assert!(matches!(
            without_id,
            ServerMessage::Error(ErrorFrame { request_id: None, .. })
        ));
    }

    #[test]
    fn test_error_field_takes_precedence_over_type() {
        let msg = ServerMessage::decode(
            r#"{"type":"response","ok":false,"error":"unauthorized","request_id":"r9","details":{"x":1}}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::Error(e) => {
                assert_eq!(e.error, "unauthorized");
                assert_eq!(e.details, Some(json!({"x": 1})));
            }
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_unknown_type_is_an_error() {
        assert!(ServerMessage::decode(r#"{"type":"hello"}"#).is_err());
        assert!(ServerMessage::decode("not json").is_err());
    }

    #[test]
    fn test_split_frame_trims_and_skips_blank_segments() {
        let frame = "  {\"a\":1}\n\n\r\n{\"b\":2}  \n   ";
        let parts: Vec<&str> = split_frame(frame).collect();
        assert_eq!(parts, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_split_frame_single_value_without_newline() {
        let parts: Vec<&str> = split_frame("{}").collect();
        assert_eq!(parts, vec!["{}"]);
    }
}
