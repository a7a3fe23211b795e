//! Typed push listeners.
//!
//! strimertul publishes events as JSON strings under fixed keys.  A listener
//! decodes each push into a typed value and hands it to the caller's
//! callback.  Values that do not decode are logged and skipped.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use kilovolt::{push_handler, Kilovolt, PushHandler, Result};

/// Wraps `callback` in a handler that decodes the pushed value as `T`.
pub(crate) fn json_handler<T, F>(callback: F) -> PushHandler
where
    T: DeserializeOwned,
    F: Fn(T) + Send + Sync + 'static,
{
    push_handler(move |value, key| match serde_json::from_str::<T>(value) {
        Ok(decoded) => callback(decoded),
        Err(e) => warn!(key, "skipping undecodable event: {e}"),
    })
}

/// Like [`json_handler`], but only passes values whose `subscription.type`
/// equals `kind`.
pub(crate) fn event_sub_handler<T, F>(kind: &'static str, callback: F) -> PushHandler
where
    T: DeserializeOwned,
    F: Fn(T) + Send + Sync + 'static,
{
    push_handler(move |value, key| {
        let raw: Value = match serde_json::from_str(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, "skipping undecodable event: {e}");
                return;
            }
        };
        if raw["subscription"]["type"].as_str() != Some(kind) {
            return;
        }
        match serde_json::from_value::<T>(raw) {
            Ok(decoded) => callback(decoded),
            Err(e) => warn!(key, kind, "skipping malformed event: {e}"),
        }
    })
}

/// Subscribes `handler` to `key` and returns it for later unsubscription.
///
/// A failed subscription leaves no handler behind.
pub(crate) async fn listen(kv: &Kilovolt, key: &str, handler: PushHandler) -> Result<PushHandler> {
    if let Err(e) = kv.subscribe_key(key, handler.clone()).await {
        if let Err(cleanup) = kv.unsubscribe_key(key, &handler).await {
            debug!(key, "unsubscribe after failed listen: {cleanup}");
        }
        return Err(e);
    }
    Ok(handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
    }

    #[test]
    fn test_json_handler_decodes_and_skips_garbage() {
        // Arrange
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = json_handler(move |p: Ping| sink.lock().unwrap().push(p.n));

        // Act
        handler(r#"{"n":1}"#, "k");
        handler("not json", "k");
        handler(r#"{"n":2}"#, "k");

        // Assert
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[derive(Debug, Deserialize)]
    struct Typed {
        event: Ping,
    }

    #[test]
    fn test_event_sub_handler_filters_on_subscription_type() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = event_sub_handler("channel.raid", move |t: Typed| {
            sink.lock().unwrap().push(t.event.n)
        });

        handler(r#"{"subscription":{"type":"channel.follow"},"event":{"n":1}}"#, "k");
        handler(r#"{"subscription":{"type":"channel.raid"},"event":{"n":2}}"#, "k");
        // Right type, wrong shape: skipped.
        handler(r#"{"subscription":{"type":"channel.raid"},"event":{}}"#, "k");

        assert_eq!(*seen.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_failed_listen_leaves_no_handler_registered() {
        // Arrange: never connected, so the subscribe request fails
        let kv = Kilovolt::new(kilovolt::ClientOptions::default());
        let handler = json_handler(|_: Ping| {});

        // Act
        let result = listen(&kv, "twitch/ev/chat-message", handler).await;

        // Assert
        assert!(matches!(result, Err(kilovolt::KilovoltError::NotConnected)));
        let snapshot = kv.subscriptions().await.unwrap();
        assert!(snapshot.keys.is_empty(), "leaked: {:?}", snapshot.keys);
    }
}
