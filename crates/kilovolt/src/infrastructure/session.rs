//! The session task.
//!
//! One background Tokio task per client owns the connection, the pending
//! request table and the subscription registry.  Public handles talk to it
//! over an unbounded `mpsc` channel of [`SessionCommand`]s and get answers
//! back on `oneshot` channels.  The lifecycle state is published on a
//! `watch` channel so handles can read it without a round trip.
//!
//! # Event loop
//!
//! ```text
//! loop {
//!     select! {
//!         command  = commands.recv()     → handle_command
//!         frame    = connection.next()   → split, decode, resolve / dispatch
//!         deadline = reconnect timer     → open_connection
//!     }
//! }
//! ```
//!
//! Everything that touches session state runs on this one task, so a frame's
//! effects (resolutions, push handler calls) complete before the next frame or
//! command is looked at.
//!
//! # Opening a connection
//!
//! 1. Transport connect.
//! 2. Authentication handshake on the new connection.
//! 3. Resubscription: every active key is re-sent and awaited in turn, then
//!    every active prefix is sent without waiting.
//! 4. The connection is published and the state becomes `Open`.
//!
//! While steps 2–3 run, frames unrelated to the handshake are processed
//! normally.  Commands are still read: `Close` aborts the handshake, and
//! everything else is deferred until it finishes.  If every handle is
//! dropped mid-handshake the connection is closed and the task stops.  An
//! authentication failure closes the connection and disables reconnection.

use std::collections::VecDeque;
use std::future::pending;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use super::transport::{Connection, Connector};
use crate::application::auth::{authenticate, RequestExchange};
use crate::application::correlator::{assign_request_id, Completion, Correlator};
use crate::application::registry::{
    PushHandler, RegistrySnapshot, Removal, SubscriptionRegistry, SubscriptionTarget,
};
use crate::domain::config::ClientOptions;
use crate::domain::events::{ConnectionState, DisconnectReason, ErrorEvent, EventHandlers};
use crate::domain::messages::{split_frame, ErrorFrame, Reply, Request, ServerMessage};
use crate::error::{KilovoltError, Result, TransportError};

/// Requests from client handles to the session task.
pub(crate) enum SessionCommand {
    /// Open the connection unless it is already open.
    Connect {
        done: oneshot::Sender<Result<()>>,
    },
    /// Send a request and deliver its reply.
    Request {
        request: Request,
        reply: oneshot::Sender<Result<Reply>>,
    },
    /// Stop waiting for a request's reply.
    Forget { request_id: String },
    /// Register a push handler locally.
    Subscribe {
        target: SubscriptionTarget,
        handler: PushHandler,
    },
    /// Remove a push handler locally.
    Unsubscribe {
        target: SubscriptionTarget,
        handler: PushHandler,
        done: oneshot::Sender<Removal>,
    },
    /// Delete an emptied registry entry.
    DropIfEmpty { target: SubscriptionTarget },
    /// Close the connection and disable reconnection.
    Close { done: oneshot::Sender<()> },
    /// Report the current registry contents.
    Registrations {
        done: oneshot::Sender<RegistrySnapshot>,
    },
}

/// Starts a session task and returns its command channel and state feed.
///
/// Must be called from within a Tokio runtime.  The task ends once every
/// command sender has been dropped.
pub(crate) fn spawn(
    options: ClientOptions,
    handlers: EventHandlers,
    connector: Arc<dyn Connector>,
) -> (
    mpsc::UnboundedSender<SessionCommand>,
    watch::Receiver<ConnectionState>,
) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let session = Session::new(options, handlers, connector, state_tx);
    tokio::spawn(session.run(commands_rx));
    (commands_tx, state_rx)
}

struct Session {
    options: ClientOptions,
    connector: Arc<dyn Connector>,
    handlers: EventHandlers,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    conn: Option<Box<dyn Connection>>,
    correlator: Correlator,
    registry: SubscriptionRegistry,
    /// Cleared by `close()` and by authentication failure; never set again.
    reconnect: bool,
    reconnect_at: Option<Instant>,
    /// Commands read during a handshake, run once it is over.
    deferred: VecDeque<SessionCommand>,
}

enum HandshakeOutcome {
    Finished(Result<()>),
    CloseRequested(oneshot::Sender<()>),
    Abandoned,
}

impl Session {
    fn new(
        options: ClientOptions,
        handlers: EventHandlers,
        connector: Arc<dyn Connector>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let reconnect = options.reconnect;
        Self {
            options,
            connector,
            handlers,
            state: ConnectionState::Disconnected,
            state_tx,
            conn: None,
            correlator: Correlator::new(),
            registry: SubscriptionRegistry::new(),
            reconnect,
            reconnect_at: None,
            deferred: VecDeque::new(),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        loop {
            if let Some(command) = self.deferred.pop_front() {
                self.handle_command(command, &mut commands).await;
                continue;
            }
            let reconnect_at = self.reconnect_at;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command, &mut commands).await,
                    None => break,
                },
                frame = next_frame(&mut self.conn) => self.handle_frame(frame).await,
                () = reconnect_timer(reconnect_at) => {
                    self.reconnect_at = None;
                    info!("reconnecting to {}", self.options.address);
                    self.open_connection(None, &mut commands).await;
                }
            }
        }

        debug!("all client handles dropped, stopping session");
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.close().await;
        }
    }

    // ── Commands ──────────────────────────────────────────────────────────────

    async fn handle_command(
        &mut self,
        command: SessionCommand,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        match command {
            SessionCommand::Connect { done } => {
                if self.state == ConnectionState::Open {
                    let _ = done.send(Ok(()));
                    return;
                }
                self.reconnect_at = None;
                self.open_connection(Some(done), commands).await;
            }
            SessionCommand::Request { request, reply } => {
                self.send_request(request, Completion::Caller(reply)).await;
            }
            SessionCommand::Forget { request_id } => {
                if self.correlator.forget(&request_id) {
                    debug!(%request_id, "stopped waiting for reply");
                }
            }
            SessionCommand::Subscribe { target, handler } => {
                let first = self.registry.add(&target, handler);
                debug!("handler added for {target} (first: {first})");
            }
            SessionCommand::Unsubscribe {
                target,
                handler,
                done,
            } => {
                let _ = done.send(self.registry.remove(&target, &handler));
            }
            SessionCommand::DropIfEmpty { target } => {
                if self.registry.drop_if_empty(&target) {
                    debug!("subscription to {target} removed");
                }
            }
            SessionCommand::Close { done } => {
                self.close().await;
                let _ = done.send(());
            }
            SessionCommand::Registrations { done } => {
                let _ = done.send(self.registry.snapshot());
            }
        }
    }

    async fn send_request(&mut self, mut request: Request, completion: Completion) {
        let request_id = assign_request_id(&mut request);
        if self.state != ConnectionState::Open {
            completion.fail(KilovoltError::NotConnected);
            return;
        }
        let Some(conn) = self.conn.as_mut() else {
            completion.fail(KilovoltError::NotConnected);
            return;
        };
        let frame = match request.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                completion.fail(e.into());
                return;
            }
        };
        if let Err((e, completion)) = self.correlator.register(request_id.clone(), completion) {
            completion.fail(e);
            return;
        }

        trace!(command = %request.command, %request_id, "sending request");
        if let Err(e) = conn.send_text(frame).await {
            warn!(%request_id, "failed to send request: {e}");
            self.handlers
                .emit_error(&ErrorEvent::Transport(e.to_string()));
            if let Some(completion) = self.correlator.take(&request_id) {
                completion.fail(e.into());
            }
        }
    }

    async fn close(&mut self) {
        self.reconnect = false;
        self.reconnect_at = None;
        let Some(mut conn) = self.conn.take() else {
            self.set_state(ConnectionState::Disconnected);
            return;
        };

        self.set_state(ConnectionState::Closing);
        if let Err(e) = conn.close().await {
            debug!("error while closing connection: {e}");
        }
        self.drop_pending();
        self.set_state(ConnectionState::Disconnected);
        info!("connection to {} closed", self.options.address);
        self.handlers.emit_close(&DisconnectReason::requested());
    }

    // ── Inbound frames ────────────────────────────────────────────────────────

    async fn handle_frame(&mut self, frame: Option<std::result::Result<String, TransportError>>) {
        match frame {
            Some(Ok(text)) => {
                for segment in split_frame(&text) {
                    self.process_segment(segment);
                }
            }
            Some(Err(e)) => {
                warn!("connection error: {e}");
                self.handlers
                    .emit_error(&ErrorEvent::Transport(e.to_string()));
                self.connection_lost(e.to_string()).await;
            }
            None => {
                self.connection_lost("connection closed by server".to_string())
                    .await;
            }
        }
    }

    fn process_segment(&mut self, segment: &str) {
        match ServerMessage::decode(segment) {
            Ok(message) => self.process_message(message),
            Err(e) => warn!("discarding undecodable frame: {e}"),
        }
    }

    fn process_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Response(response) => {
                let request_id = response.request_id.clone();
                if !self
                    .correlator
                    .resolve(&request_id, Reply::Response(response))
                {
                    warn!(%request_id, "received a response for an unregistered request");
                }
            }
            ServerMessage::Push(push) => {
                let called = self.registry.dispatch(&push);
                trace!(key = %push.key, handlers = called, "push dispatched");
            }
            ServerMessage::Error(frame) => {
                self.report_protocol_error(&frame);
                if let Some(request_id) = frame.request_id.clone() {
                    if !self.correlator.resolve(&request_id, Reply::Error(frame)) {
                        debug!(%request_id, "error frame names no pending request");
                    }
                }
            }
        }
    }

    fn report_protocol_error(&self, frame: &ErrorFrame) {
        warn!(request_id = ?frame.request_id, "server error: {}", frame.error);
        self.handlers.emit_error(&ErrorEvent::Protocol {
            message: frame.error.clone(),
            request_id: frame.request_id.clone(),
            details: frame.details.clone(),
        });
    }

    async fn connection_lost(&mut self, message: String) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.close().await;
        }
        self.drop_pending();
        self.set_state(ConnectionState::Disconnected);
        info!("disconnected from {}: {message}", self.options.address);
        self.handlers.emit_close(&DisconnectReason::remote(message));
        self.schedule_reconnect();
    }

    // ── Opening ───────────────────────────────────────────────────────────────

    async fn open_connection(
        &mut self,
        done: Option<oneshot::Sender<Result<()>>>,
        commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    ) {
        self.set_state(ConnectionState::Connecting);
        let address = self.options.address.clone();

        let mut conn = match self.connector.connect(&address).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("could not connect to {address}: {e}");
                self.handlers
                    .emit_error(&ErrorEvent::Transport(e.to_string()));
                self.set_state(ConnectionState::Disconnected);
                self.schedule_reconnect();
                finish(done, Err(e.into()));
                return;
            }
        };
        debug!("transport to {address} open, authenticating");

        let mode = self.options.auth_mode();
        let mut deferred = Vec::new();
        let outcome = {
            let handshake = async {
                let mut exchange = Handshake {
                    session: &mut *self,
                    conn: &mut conn,
                };
                match authenticate(&mode, &mut exchange).await {
                    Ok(()) => exchange.resubscribe().await,
                    Err(e) => Err(e),
                }
            };
            tokio::pin!(handshake);
            loop {
                tokio::select! {
                    result = &mut handshake => break HandshakeOutcome::Finished(result),
                    command = commands.recv() => match command {
                        Some(SessionCommand::Close { done }) => {
                            break HandshakeOutcome::CloseRequested(done)
                        }
                        Some(command) => deferred.push(command),
                        None => break HandshakeOutcome::Abandoned,
                    },
                }
            }
        };
        self.deferred.extend(deferred);

        let handshake = match outcome {
            HandshakeOutcome::Finished(result) => result,
            HandshakeOutcome::CloseRequested(close_done) => {
                info!("close requested while connecting to {address}");
                self.conn = Some(conn);
                self.close().await;
                finish(done, Err(KilovoltError::ConnectionClosed));
                let _ = close_done.send(());
                return;
            }
            HandshakeOutcome::Abandoned => {
                debug!("all client handles dropped during handshake");
                let _ = conn.close().await;
                self.drop_pending();
                self.set_state(ConnectionState::Disconnected);
                return;
            }
        };

        match handshake {
            Ok(()) => {
                self.conn = Some(conn);
                self.set_state(ConnectionState::Open);
                info!("connected to {address}");
                self.handlers.emit_open();
                finish(done, Ok(()));
            }
            Err(KilovoltError::Auth(message)) => {
                self.handlers
                    .emit_error(&ErrorEvent::Auth(message.clone()));
                self.reconnect = false;
                self.reconnect_at = None;
                let _ = conn.close().await;
                self.drop_pending();
                self.set_state(ConnectionState::Disconnected);
                self.handlers.emit_close(&DisconnectReason {
                    message: format!("authentication failed: {message}"),
                    requested: true,
                });
                finish(done, Err(KilovoltError::Auth(message)));
            }
            Err(e) => {
                warn!("connection to {address} failed during handshake: {e}");
                self.handlers
                    .emit_error(&ErrorEvent::Transport(e.to_string()));
                let _ = conn.close().await;
                self.drop_pending();
                self.set_state(ConnectionState::Disconnected);
                self.handlers
                    .emit_close(&DisconnectReason::remote(e.to_string()));
                self.schedule_reconnect();
                finish(done, Err(e));
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if !self.reconnect {
            return;
        }
        let delay = self.options.reconnect_delay();
        info!("reconnecting in {}s", delay.as_secs());
        self.reconnect_at = Some(Instant::now() + delay);
    }

    fn drop_pending(&mut self) {
        let dropped = self.correlator.clear();
        if dropped > 0 {
            debug!("dropped {dropped} pending request(s)");
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        debug!("connection state: {} -> {state}", self.state);
        self.state = state;
        self.state_tx.send_replace(state);
        self.handlers.emit_state_change(state);
    }
}

/// The handshake's view of a connection that is not yet published.
struct Handshake<'a> {
    session: &'a mut Session,
    conn: &'a mut Box<dyn Connection>,
}

impl Handshake<'_> {
    async fn resubscribe(&mut self) -> Result<()> {
        let keys = self.session.registry.active_keys();
        let prefixes = self.session.registry.active_prefixes();
        if keys.is_empty() && prefixes.is_empty() {
            return Ok(());
        }
        debug!(
            keys = keys.len(),
            prefixes = prefixes.len(),
            "restoring subscriptions"
        );

        for key in keys {
            match self.exchange(Request::subscribe(&key)).await? {
                Reply::Response(r) if r.ok => {}
                Reply::Response(_) => warn!("server refused resubscription to key {key}"),
                Reply::Error(e) => warn!("resubscribing to key {key} failed: {}", e.error),
            }
        }

        for prefix in prefixes {
            let mut request = Request::subscribe_prefix(&prefix);
            let request_id = assign_request_id(&mut request);
            let frame = request.to_frame()?;
            let completion = Completion::Detached {
                label: format!("resubscription to prefix {prefix}"),
            };
            if let Err((e, completion)) =
                self.session.correlator.register(request_id.clone(), completion)
            {
                completion.fail(e);
                continue;
            }
            if let Err(e) = self.conn.send_text(frame).await {
                self.session.correlator.forget(&request_id);
                return Err(e.into());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RequestExchange for Handshake<'_> {
    async fn exchange(&mut self, mut request: Request) -> Result<Reply> {
        let request_id = assign_request_id(&mut request);
        let frame = request.to_frame()?;
        trace!(command = %request.command, %request_id, "sending handshake request");
        self.conn.send_text(frame).await?;

        loop {
            let text = match self.conn.next_text().await {
                Some(Ok(text)) => text,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::Closed.into()),
            };

            let mut reply = None;
            for segment in split_frame(&text) {
                let message = match ServerMessage::decode(segment) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("discarding undecodable frame: {e}");
                        continue;
                    }
                };
                match message {
                    ServerMessage::Response(r) if reply.is_none() && r.request_id == request_id => {
                        reply = Some(Reply::Response(r));
                    }
                    ServerMessage::Error(e)
                        if reply.is_none()
                            && e.request_id.as_deref() == Some(request_id.as_str()) =>
                    {
                        self.session.report_protocol_error(&e);
                        reply = Some(Reply::Error(e));
                    }
                    other => self.session.process_message(other),
                }
            }
            if let Some(reply) = reply {
                return Ok(reply);
            }
        }
    }
}

fn finish(done: Option<oneshot::Sender<Result<()>>>, result: Result<()>) {
    match done {
        Some(done) => {
            let _ = done.send(result);
        }
        None => {
            if let Err(e) = result {
                error!("reconnect attempt failed: {e}");
            }
        }
    }
}

async fn next_frame(
    conn: &mut Option<Box<dyn Connection>>,
) -> Option<std::result::Result<String, TransportError>> {
    match conn {
        Some(conn) => conn.next_text().await,
        None => pending().await,
    }
}

async fn reconnect_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
