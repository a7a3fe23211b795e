//! Request/response correlation.
//!
//! Every outbound request carries a `request_id`.  The correlator keeps one
//! pending completion per id and fires it when the matching response (or an
//! error frame naming that id) arrives.  Resolution removes the entry, so a
//! duplicate response for the same id finds nothing and is reported as
//! unknown instead of firing twice.
//!
//! Ids are UUID v4 strings unless the caller supplied one.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::messages::{Reply, Request};
use crate::error::{KilovoltError, Result};

/// Returns a fresh request identifier.
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Gives `request` an id if it has none and returns the id it will carry.
pub fn assign_request_id(request: &mut Request) -> String {
    request
        .request_id
        .get_or_insert_with(new_request_id)
        .clone()
}

/// Who is waiting on a pending request.
#[derive(Debug)]
pub enum Completion {
    /// A caller awaiting the reply.
    Caller(oneshot::Sender<Result<Reply>>),
    /// Nobody awaits the reply; the outcome is only logged.
    Detached { label: String },
}

impl Completion {
    /// Delivers `reply`.  A caller that has gone away is not an error.
    pub fn complete(self, reply: Reply) {
        match self {
            Completion::Caller(tx) => {
                let _ = tx.send(Ok(reply));
            }
            Completion::Detached { label } => match reply {
                Reply::Error(e) => warn!("{label} failed: {}", e.error),
                Reply::Response(r) if !r.ok => warn!("{label} was rejected by the server"),
                Reply::Response(_) => debug!("{label} acknowledged"),
            },
        }
    }

    /// Fails the request before it was ever registered.
    pub fn fail(self, error: KilovoltError) {
        match self {
            Completion::Caller(tx) => {
                let _ = tx.send(Err(error));
            }
            Completion::Detached { label } => warn!("{label} could not be sent: {error}"),
        }
    }
}

/// The pending-request table.  Owned by exactly one session.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<String, Completion>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `id`.
    ///
    /// # Errors
    ///
    /// [`KilovoltError::DuplicateRequestId`] if `id` is already pending; the
    /// existing entry is left untouched and `completion` is handed back.
    pub fn register(
        &mut self,
        id: String,
        completion: Completion,
    ) -> std::result::Result<(), (KilovoltError, Completion)> {
        if self.pending.contains_key(&id) {
            return Err((KilovoltError::DuplicateRequestId(id), completion));
        }
        self.pending.insert(id, completion);
        Ok(())
    }

    /// Fires and removes the completion for `id`.
    ///
    /// Returns `false` if nothing was pending under `id`.
    pub fn resolve(&mut self, id: &str, reply: Reply) -> bool {
        match self.pending.remove(id) {
            Some(completion) => {
                completion.complete(reply);
                true
            }
            None => false,
        }
    }

    /// Drops the entry for `id` without firing it (e.g. after a timeout).
    pub fn forget(&mut self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Removes and returns the completion for `id`.
    pub fn take(&mut self, id: &str) -> Option<Completion> {
        self.pending.remove(id)
    }

    /// Drops every pending entry.  Waiting callers observe their reply
    /// channel closing.  Returns how many entries were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }

    #[cfg(test)]
    fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
