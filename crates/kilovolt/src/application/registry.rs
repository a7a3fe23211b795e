//! Local subscription registry.
//!
//! Two independent tables map an exact key or a key prefix to an ordered list
//! of push handlers.  The registry outlives any single connection: after a
//! reconnect the session reads [`SubscriptionRegistry::active_keys`] and
//! [`SubscriptionRegistry::active_prefixes`] to re-register everything with
//! the server.
//!
//! # Handler identity
//!
//! Handlers are `Arc` closures.  Two handles are the same handler when they
//! point at the same allocation, so the value returned by [`push_handler`]
//! (or any clone of it) is what a caller passes back to unsubscribe.
//!
//! # Dispatch
//!
//! A push for key `k` goes to every handler on the exact entry for `k`, in
//! registration order, then to every handler of every prefix `p` with
//! `k.starts_with(p)`, prefixes taken in lexicographic order.
//!
//! A handler that panics is logged and skipped; the remaining handlers still
//! run and the session keeps going.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::domain::messages::Push;

/// Callback invoked with `(new_value, key)` for every matching push.
pub type PushHandler = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Wraps a closure as a [`PushHandler`].
pub fn push_handler<F>(f: F) -> PushHandler
where
    F: Fn(&str, &str) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_handler(a: &PushHandler, b: &PushHandler) -> bool {
    // Compare data pointers only; vtable pointers are not guaranteed unique.
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

fn invoke(handler: &PushHandler, push: &Push) -> bool {
    match catch_unwind(AssertUnwindSafe(|| handler(&push.new_value, &push.key))) {
        Ok(()) => true,
        Err(panic) => {
            error!(key = %push.key, "push handler panicked: {}", panic_message(&*panic));
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        return s;
    }
    match panic.downcast_ref::<String>() {
        Some(s) => s.as_str(),
        None => "non-string panic payload",
    }
}

/// What a subscription is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubscriptionTarget {
    Key(String),
    Prefix(String),
}

impl SubscriptionTarget {
    pub fn name(&self) -> &str {
        match self {
            SubscriptionTarget::Key(name) | SubscriptionTarget::Prefix(name) => name,
        }
    }
}

impl fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTarget::Key(k) => write!(f, "key {k}"),
            SubscriptionTarget::Prefix(p) => write!(f, "prefix {p}"),
        }
    }
}

/// Outcome of removing a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// No entry exists for the target.
    NotSubscribed,
    /// The entry exists but does not contain this handler.
    HandlerNotFound,
    /// The handler was removed; this many handlers remain.
    Remaining(usize),
    /// The handler was the last one.  The entry stays in place, empty, until
    /// [`SubscriptionRegistry::drop_if_empty`] is called.
    Emptied,
}

/// Per-target handler counts, for diagnostics and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub keys: BTreeMap<String, usize>,
    pub prefixes: BTreeMap<String, usize>,
}

#[derive(Default)]
struct HandlerTable {
    entries: BTreeMap<String, Vec<PushHandler>>,
}

impl HandlerTable {
    fn add(&mut self, name: &str, handler: PushHandler) -> bool {
        let list = self.entries.entry(name.to_string()).or_default();
        list.push(handler);
        list.len() == 1
    }

    fn remove(&mut self, name: &str, handler: &PushHandler) -> Removal {
        let Some(list) = self.entries.get_mut(name) else {
            return Removal::NotSubscribed;
        };
        let Some(pos) = list.iter().position(|h| same_handler(h, handler)) else {
            return Removal::HandlerNotFound;
        };
        list.remove(pos);
        if list.is_empty() {
            Removal::Emptied
        } else {
            Removal::Remaining(list.len())
        }
    }

    fn drop_if_empty(&mut self, name: &str) -> bool {
        if self.entries.get(name).is_some_and(Vec::is_empty) {
            self.entries.remove(name);
            return true;
        }
        false
    }

    fn active(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn counts(&self) -> BTreeMap<String, usize> {
        self.entries
            .iter()
            .map(|(name, list)| (name.clone(), list.len()))
            .collect()
    }
}

/// Exact-key and prefix subscriptions with their handlers.
#[derive(Default)]
pub struct SubscriptionRegistry {
    keys: HandlerTable,
    prefixes: HandlerTable,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table<'a>(&'a self, target: &'a SubscriptionTarget) -> (&'a HandlerTable, &'a str) {
        match target {
            SubscriptionTarget::Key(k) => (&self.keys, k),
            SubscriptionTarget::Prefix(p) => (&self.prefixes, p),
        }
    }

    fn table_mut<'a>(
        &'a mut self,
        target: &'a SubscriptionTarget,
    ) -> (&'a mut HandlerTable, &'a str) {
        match target {
            SubscriptionTarget::Key(k) => (&mut self.keys, k),
            SubscriptionTarget::Prefix(p) => (&mut self.prefixes, p),
        }
    }

    /// Appends `handler` to the target's list.
    ///
    /// Returns `true` if this is the first handler for the target.  The same
    /// handler may be added twice; it is then called twice per push.
    pub fn add(&mut self, target: &SubscriptionTarget, handler: PushHandler) -> bool {
        let (table, name) = self.table_mut(target);
        table.add(name, handler)
    }

    /// Removes the first occurrence of `handler` from the target's list.
    pub fn remove(&mut self, target: &SubscriptionTarget, handler: &PushHandler) -> Removal {
        let (table, name) = self.table_mut(target);
        table.remove(name, handler)
    }

    /// Deletes the target's entry if its list is empty.
    ///
    /// Returns `true` if an entry was deleted.  A handler added between the
    /// removal and this call keeps the entry alive.
    pub fn drop_if_empty(&mut self, target: &SubscriptionTarget) -> bool {
        let (table, name) = self.table_mut(target);
        table.drop_if_empty(name)
    }

    /// Number of handlers registered for the target.
    pub fn handler_count(&self, target: &SubscriptionTarget) -> usize {
        let (table, name) = self.table(target);
        table.entries.get(name).map_or(0, Vec::len)
    }

    /// Invokes every handler matching `push` and returns how many ran to
    /// completion.  Panicking handlers are not counted.
    pub fn dispatch(&self, push: &Push) -> usize {
        let exact = self.keys.entries.get(&push.key).into_iter().flatten();
        let by_prefix = self
            .prefixes
            .entries
            .iter()
            .filter(|(prefix, _)| push.key.starts_with(prefix.as_str()))
            .flat_map(|(_, list)| list);

        exact
            .chain(by_prefix)
            .map(|handler| invoke(handler, push))
            .filter(|completed| *completed)
            .count()
    }

    /// Keys with at least one handler, sorted.
    pub fn active_keys(&self) -> Vec<String> {
        self.keys.active()
    }

    /// Prefixes with at least one handler, sorted.
    pub fn active_prefixes(&self) -> Vec<String> {
        self.prefixes.active()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            keys: self.keys.counts(),
            prefixes: self.prefixes.counts(),
        }
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("SubscriptionRegistry")
            .field("keys", &snapshot.keys)
            .field("prefixes", &snapshot.prefixes)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
