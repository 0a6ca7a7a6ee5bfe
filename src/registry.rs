//! Listener bookkeeping shared by the message and storage facades.
//!
//! Callers hand the facades opaque callbacks; the host only ever sees
//! generated adapters. This module owns the association between the two: a
//! keyed map from callback identity to a secondary map from scope key to
//! the adapter serving that scope. The attach/detach hooks passed in by
//! the facades are the host add/remove primitives, so an adapter is
//! registered with the host exactly as long as it is stored here.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Identity of a caller-supplied callback: the address of its `Arc`
/// allocation. Clones of one `Arc` agree on the key; separately created
/// callbacks never share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(usize);

impl ListenerKey {
    pub fn of<T: ?Sized>(callback: &Arc<T>) -> Self {
        ListenerKey(Arc::as_ptr(callback) as *const () as usize)
    }
}

/// Scope of one message-listener registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// Fires for every generic message.
    All,
    /// Fires only when the message's `type` equals the topic exactly.
    Topic(String),
}

/// Two-level listener map: callback identity -> scope key -> adapter.
pub struct ListenerRegistry<S, A> {
    entries: DashMap<ListenerKey, HashMap<S, A>>,
}

impl<S, A> ListenerRegistry<S, A>
where
    S: Eq + Hash,
    A: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Build an adapter for `(key, scope)` via `make`, hand it to `attach`
    /// (the host add primitive) and store it.
    ///
    /// Registering a pair that already holds an adapter is a no-op: the
    /// host keeps exactly one registration per pair no matter how often a
    /// caller repeats itself.
    pub fn register<F, G>(&self, key: ListenerKey, scope: S, make: F, attach: G)
    where
        F: FnOnce() -> A,
        G: FnOnce(&A),
    {
        let mut scopes = self.entries.entry(key).or_default();
        if scopes.contains_key(&scope) {
            return;
        }
        let adapter = make();
        attach(&adapter);
        scopes.insert(scope, adapter);
    }

    /// Remove the adapter for `(key, scope)` and pass it to `detach` (the
    /// host remove primitive). Removing the last scope of a callback drops
    /// its whole entry. Unknown pairs are ignored.
    pub fn unregister<G>(&self, key: ListenerKey, scope: &S, detach: G)
    where
        G: FnOnce(&A),
    {
        if let Entry::Occupied(mut occupied) = self.entries.entry(key) {
            if let Some(adapter) = occupied.get_mut().remove(scope) {
                detach(&adapter);
            }
            if occupied.get().is_empty() {
                occupied.remove();
            }
        }
    }

    /// Detach and drop every adapter registered for `key`.
    pub fn unregister_all<G>(&self, key: ListenerKey, mut detach: G)
    where
        G: FnMut(&A),
    {
        if let Some((_, scopes)) = self.entries.remove(&key) {
            for adapter in scopes.values() {
                detach(adapter);
            }
        }
    }

    /// Whether `key` currently holds any registration.
    pub fn contains(&self, key: ListenerKey) -> bool {
        self.entries.contains_key(&key)
    }
}

impl<S, A> Default for ListenerRegistry<S, A>
where
    S: Eq + Hash,
    A: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
