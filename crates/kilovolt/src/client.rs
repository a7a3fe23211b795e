//! The public client handle.
//!
//! [`Kilovolt`] is a cheap, cloneable handle to one session task.  Every
//! clone talks to the same connection and shares the same subscriptions; the
//! session stops when the last clone is dropped.
//!
//! ```rust,no_run
//! use kilovolt::{push_handler, ClientOptions, Kilovolt};
//!
//! # async fn demo() -> kilovolt::Result<()> {
//! let client = Kilovolt::new(ClientOptions::default());
//! client.connect().await?;
//!
//! client.put_key("stream/title", "Speedrun night").await?;
//! let title = client.get_key("stream/title").await?;
//!
//! let on_change = push_handler(|value, key| println!("{key} is now {value}"));
//! client.subscribe_key("stream/title", on_change.clone()).await?;
//! client.unsubscribe_key("stream/title", &on_change).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::application::correlator::assign_request_id;
use crate::application::registry::{PushHandler, RegistrySnapshot, Removal, SubscriptionTarget};
use crate::domain::config::ClientOptions;
use crate::domain::events::{ConnectionState, EventHandlers};
use crate::domain::messages::{Command, Reply, Request, Response};
use crate::error::{KilovoltError, Result};
use crate::infrastructure::session::{self, SessionCommand};
use crate::infrastructure::transport::Connector;
use crate::infrastructure::websocket::WebSocketConnector;

/// Handle to a Kilovolt session.
#[derive(Clone)]
pub struct Kilovolt {
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<ConnectionState>,
    request_timeout: Option<Duration>,
}

impl Kilovolt {
    // ── Construction ─────────────────────────────────────────────────────────

    /// Creates a WebSocket client with no event observers.
    ///
    /// Nothing is sent until [`Kilovolt::connect`] is called.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(options: ClientOptions) -> Self {
        Self::with_events(options, EventHandlers::default())
    }

    /// Creates a WebSocket client that reports lifecycle events to `handlers`.
    pub fn with_events(options: ClientOptions, handlers: EventHandlers) -> Self {
        Self::with_transport(options, handlers, Arc::new(WebSocketConnector))
    }

    /// Creates a client on an arbitrary transport.
    pub fn with_transport(
        options: ClientOptions,
        handlers: EventHandlers,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let request_timeout = options.request_timeout();
        let (commands, state) = session::spawn(options, handlers, connector);
        Self {
            commands,
            state,
            request_timeout,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Opens, authenticates and resubscribes.  Returns once the client is
    /// open, or with the first error.  Calling it while open is a no-op.
    pub async fn connect(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.command(SessionCommand::Connect { done })?;
        rx.await.map_err(|_| KilovoltError::ClientStopped)?
    }

    /// Same as [`Kilovolt::connect`].
    pub async fn reconnect(&self) -> Result<()> {
        self.connect().await
    }

    /// Closes the connection and turns automatic reconnection off for good.
    ///
    /// Requests still waiting for a reply fail with
    /// [`KilovoltError::ConnectionClosed`].
    pub async fn close(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.command(SessionCommand::Close { done })?;
        rx.await.map_err(|_| KilovoltError::ClientStopped)
    }

    /// Resolves as soon as the client is open: immediately if it already
    /// is, otherwise on the next transition to open.
    pub async fn wait(&self) -> Result<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|s| *s == ConnectionState::Open)
            .await
            .map(|_| ())
            .map_err(|_| KilovoltError::ClientStopped)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// A receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    // ── Raw requests ─────────────────────────────────────────────────────────

    /// Sends `request` and waits for its reply.
    ///
    /// Fails immediately with [`KilovoltError::NotConnected`] when the client
    /// is not open; nothing is queued.  An error frame naming the request
    /// comes back as [`Reply::Error`], not as an `Err`.
    pub async fn send(&self, mut request: Request) -> Result<Reply> {
        if !self.is_connected() {
            return Err(KilovoltError::NotConnected);
        }
        let request_id = assign_request_id(&mut request);
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Request { request, reply })?;

        let Some(limit) = self.request_timeout else {
            return rx.await.map_err(|_| KilovoltError::ConnectionClosed)?;
        };
        match tokio::time::timeout(limit, rx).await {
            Ok(reply) => reply.map_err(|_| KilovoltError::ConnectionClosed)?,
            Err(_) => {
                warn!(%request_id, "request timed out after {}s", limit.as_secs());
                let _ = self.commands.send(SessionCommand::Forget {
                    request_id: request_id.clone(),
                });
                Err(KilovoltError::Timeout { request_id })
            }
        }
    }

    async fn call(&self, request: Request) -> Result<Response> {
        match self.send(request).await? {
            Reply::Response(response) => Ok(response),
            Reply::Error(e) => Err(KilovoltError::Server { message: e.error }),
        }
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Value of `key`.  A key that was never set reads as an empty string.
    pub async fn get_key(&self, key: &str) -> Result<String> {
        let response = self.call(Request::get(key)).await?;
        let value: Option<String> = payload(Command::Get, response.data)?;
        Ok(value.unwrap_or_default())
    }

    pub async fn get_keys<I, S>(&self, keys: I) -> Result<HashMap<String, String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        let response = self.call(Request::get_bulk(&keys)).await?;
        let values: Option<HashMap<String, String>> = payload(Command::GetBulk, response.data)?;
        Ok(values.unwrap_or_default())
    }

    /// Every key under `prefix` with its value.
    pub async fn get_keys_by_prefix(&self, prefix: &str) -> Result<HashMap<String, String>> {
        let response = self.call(Request::get_all(prefix)).await?;
        let values: Option<HashMap<String, String>> = payload(Command::GetAll, response.data)?;
        Ok(values.unwrap_or_default())
    }

    /// Reads `key` and parses it as JSON.
    ///
    /// # Errors
    ///
    /// [`KilovoltError::Json`] if the stored value is not valid JSON for `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let raw = self.get_key(key).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub async fn get_jsons<T, I, S>(&self, keys: I) -> Result<HashMap<String, T>>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.get_keys(keys)
            .await?
            .into_iter()
            .map(|(key, raw)| -> Result<(String, T)> { Ok((key, serde_json::from_str(&raw)?)) })
            .collect()
    }

    /// Keys under `prefix`, or every key when `prefix` is `None`.
    pub async fn key_list(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let response = self.call(Request::list(prefix)).await?;
        let keys: Option<Vec<String>> = payload(Command::List, response.data)?;
        Ok(keys.unwrap_or_default())
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    pub async fn put_key(&self, key: &str, value: &str) -> Result<()> {
        self.call(Request::set(key, value)).await.map(|_| ())
    }

    pub async fn put_keys(&self, entries: &HashMap<String, String>) -> Result<()> {
        self.call(Request::set_bulk(entries)).await.map(|_| ())
    }

    /// Serializes `value` as JSON and stores it under `key`.
    pub async fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.put_key(key, &raw).await
    }

    pub async fn put_jsons<T: Serialize>(&self, entries: &HashMap<String, T>) -> Result<()> {
        let encoded = entries
            .iter()
            .map(|(key, value)| -> Result<(String, String)> {
                Ok((key.clone(), serde_json::to_string(value)?))
            })
            .collect::<Result<HashMap<String, String>>>()?;
        self.put_keys(&encoded).await
    }

    pub async fn delete_key(&self, key: &str) -> Result<()> {
        self.call(Request::delete(key)).await.map(|_| ())
    }

    // ── Subscriptions ────────────────────────────────────────────────────────

    /// Calls `handler` with `(new_value, key)` whenever `key` changes.
    ///
    /// The handler is registered locally before the server is asked, so a
    /// push that races the acknowledgement still reaches it.  It stays
    /// registered even if the server request fails, and is re-sent on the
    /// next successful open.
    pub async fn subscribe_key(&self, key: &str, handler: PushHandler) -> Result<()> {
        self.command(SessionCommand::Subscribe {
            target: SubscriptionTarget::Key(key.to_string()),
            handler,
        })?;
        self.call(Request::subscribe(key)).await.map(|_| ())
    }

    /// Calls `handler` for every change to a key starting with `prefix`.
    pub async fn subscribe_prefix(&self, prefix: &str, handler: PushHandler) -> Result<()> {
        self.command(SessionCommand::Subscribe {
            target: SubscriptionTarget::Prefix(prefix.to_string()),
            handler,
        })?;
        self.call(Request::subscribe_prefix(prefix))
            .await
            .map(|_| ())
    }

    /// Removes `handler` from `key`.
    ///
    /// Returns `Ok(false)` without contacting the server if `key` has no
    /// subscription or `handler` is not among its handlers.  When the last
    /// handler goes, the server is told to unsubscribe and its answer is
    /// returned.
    pub async fn unsubscribe_key(&self, key: &str, handler: &PushHandler) -> Result<bool> {
        self.unsubscribe(SubscriptionTarget::Key(key.to_string()), handler)
            .await
    }

    pub async fn unsubscribe_prefix(&self, prefix: &str, handler: &PushHandler) -> Result<bool> {
        self.unsubscribe(SubscriptionTarget::Prefix(prefix.to_string()), handler)
            .await
    }

    async fn unsubscribe(&self, target: SubscriptionTarget, handler: &PushHandler) -> Result<bool> {
        let (done, rx) = oneshot::channel();
        self.command(SessionCommand::Unsubscribe {
            target: target.clone(),
            handler: handler.clone(),
            done,
        })?;

        match rx.await.map_err(|_| KilovoltError::ClientStopped)? {
            Removal::NotSubscribed => {
                warn!("cannot unsubscribe from {target}: no subscription exists");
                Ok(false)
            }
            Removal::HandlerNotFound => {
                warn!("cannot unsubscribe from {target}: handler is not registered");
                Ok(false)
            }
            Removal::Remaining(n) => {
                debug!("handler removed from {target}, {n} remaining");
                Ok(true)
            }
            Removal::Emptied => {
                let request = match &target {
                    SubscriptionTarget::Key(key) => Request::unsubscribe(key),
                    SubscriptionTarget::Prefix(prefix) => Request::unsubscribe_prefix(prefix),
                };
                let result = self.send(request).await;
                self.command(SessionCommand::DropIfEmpty {
                    target: target.clone(),
                })?;
                match result? {
                    Reply::Response(response) => Ok(response.ok),
                    Reply::Error(e) => {
                        warn!("server rejected unsubscribe from {target}: {}", e.error);
                        Ok(false)
                    }
                }
            }
        }
    }

    /// Handler counts per subscribed key and prefix.
    pub async fn subscriptions(&self) -> Result<RegistrySnapshot> {
        let (done, rx) = oneshot::channel();
        self.command(SessionCommand::Registrations { done })?;
        rx.await.map_err(|_| KilovoltError::ClientStopped)
    }

    fn command(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| KilovoltError::ClientStopped)
    }
}

impl std::fmt::Debug for Kilovolt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kilovolt")
            .field("state", &self.state())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn payload<T: DeserializeOwned>(command: Command, data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|source| KilovoltError::UnexpectedPayload { command, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::registry::push_handler;
    use crate::infrastructure::transport::MockConnector;

    fn offline_client() -> Kilovolt {
        let mut connector = MockConnector::new();
        connector.expect_connect().never();
        Kilovolt::with_transport(
            ClientOptions::default(),
            EventHandlers::new(),
            Arc::new(connector),
        )
    }

    #[tokio::test]
    async fn test_new_client_starts_disconnected() {
        let client = offline_client();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_wait_stays_pending_while_disconnected() {
        // Arrange
        let client = offline_client();

        // Act
        let mut wait = tokio_test::task::spawn(client.wait());

        // Assert
        tokio_test::assert_pending!(wait.poll());
        assert!(!wait.is_woken());
    }

    #[tokio::test]
    async fn test_operations_fail_fast_when_not_connected() {
        let client = offline_client();

        assert!(matches!(
            client.get_key("foo").await,
            Err(KilovoltError::NotConnected)
        ));
        assert!(matches!(
            client.put_json("foo", &vec![1, 2]).await,
            Err(KilovoltError::NotConnected)
        ));
        assert!(matches!(
            client.key_list(None).await,
            Err(KilovoltError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_offline_subscribe_keeps_local_registration() {
        // Arrange
        let client = offline_client();
        let handler = push_handler(|_, _| {});

        // Act
        let result = client.subscribe_key("foo", handler).await;
        let snapshot = client.subscriptions().await.unwrap();

        // Assert
        assert!(matches!(result, Err(KilovoltError::NotConnected)));
        assert_eq!(snapshot.keys.get("foo"), Some(&1));
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_handler_returns_false() {
        let client = offline_client();
        let registered = push_handler(|_, _| {});
        let stranger = push_handler(|_, _| {});
        let _ = client.subscribe_key("foo", registered).await;

        assert!(!client.unsubscribe_key("bar", &stranger).await.unwrap());
        assert!(!client.unsubscribe_key("foo", &stranger).await.unwrap());
    }

    #[tokio::test]
    async fn test_unsubscribe_with_remaining_handlers_succeeds_offline() {
        let client = offline_client();
        let a = push_handler(|_, _| {});
        let b = push_handler(|_, _| {});
        let _ = client.subscribe_prefix("twitch/", a.clone()).await;
        let _ = client.subscribe_prefix("twitch/", b).await;

        assert!(client.unsubscribe_prefix("twitch/", &a).await.unwrap());
        assert_eq!(
            client.subscriptions().await.unwrap().prefixes.get("twitch/"),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn test_close_without_connection_is_ok() {
        let client = offline_client();
        client.close().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_payload_shape_mismatch_names_command() {
        let result: Result<Vec<String>> = payload(Command::List, serde_json::json!("nope"));
        match result {
            Err(e @ KilovoltError::UnexpectedPayload { .. }) => {
                assert!(e.to_string().starts_with("unexpected payload for klist"))
            }
            other => panic!("expected payload error, got {other:?}"),
        }
    }
}
