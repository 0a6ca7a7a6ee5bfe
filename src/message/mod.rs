//! Unified send / listen surface over the host message transport.
//!
//! One [`Messenger`] serves one execution context (a tab's content script,
//! a popup, the background context). Broadcast and targeted sends share a
//! single dispatch path; listener registrations go through the
//! [`ListenerRegistry`] so the host holds exactly one adapter per
//! (callback, scope) pair. The page-addressed channel is layered on top in
//! [`page`](self) and shares this module's transport and registry
//! machinery.

mod page;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::envelope::{self, PageInfo};
use crate::error::Result;
use crate::host::{HostTransport, MessageAdapter, MessageSender, TabId};
use crate::registry::{ListenerKey, ListenerRegistry, ScopeKey};

/// Caller-supplied message handler.
///
/// Returning `Some(value)` answers the sender. The callback's `Arc`
/// identity doubles as its registration key, so keep a clone around to
/// remove it later.
pub type Listener = Arc<dyn Fn(Value, MessageSender) -> Option<Value> + Send + Sync>;

/// Send / listen facade for one execution context.
pub struct Messenger {
    transport: Arc<dyn HostTransport>,
    listeners: ListenerRegistry<ScopeKey, MessageAdapter>,
    page_listeners: ListenerRegistry<ScopeKey, MessageAdapter>,
    page: Arc<OnceCell<PageInfo>>,
    relay: OnceCell<MessageAdapter>,
}

impl Messenger {
    pub fn new(transport: Arc<dyn HostTransport>) -> Self {
        Self {
            transport,
            listeners: ListenerRegistry::new(),
            page_listeners: ListenerRegistry::new(),
            page: Arc::new(OnceCell::new()),
            relay: OnceCell::new(),
        }
    }

    /// Broadcast `msg` to every context of the runtime. Resolves with the
    /// first listener response, or `Value::Null` when nobody responds.
    pub async fn send(&self, msg: Value) -> Result<Value> {
        self.dispatch_send(None, msg).await
    }

    /// Send `msg` to the contexts of one tab.
    pub async fn send_to_tab(&self, tab: TabId, msg: Value) -> Result<Value> {
        self.dispatch_send(Some(tab), msg).await
    }

    async fn dispatch_send(&self, dest: Option<TabId>, msg: Value) -> Result<Value> {
        debug!(dest = ?dest, topic = ?envelope::topic_of(&msg), "sending message");
        match dest {
            Some(tab) => self.transport.send_to_tab(tab, msg).await,
            None => self.transport.broadcast(msg).await,
        }
    }

    /// Register `callback` for every generic message, whatever its type.
    pub fn add_listener(&self, callback: Listener) {
        self.register(ScopeKey::All, callback);
    }

    /// Register `callback` for generic messages whose `type` equals
    /// `topic` exactly.
    pub fn add_topic_listener(&self, topic: impl Into<String>, callback: Listener) {
        self.register(ScopeKey::Topic(topic.into()), callback);
    }

    /// Drop the match-all registration of `callback`, if any.
    pub fn remove_listener(&self, callback: &Listener) {
        self.unregister(&ScopeKey::All, callback);
    }

    /// Drop the `topic` registration of `callback`, if any.
    pub fn remove_topic_listener(&self, topic: &str, callback: &Listener) {
        self.unregister(&ScopeKey::Topic(topic.to_owned()), callback);
    }

    /// Drop every generic registration of `callback`.
    pub fn remove_all_listeners(&self, callback: &Listener) {
        self.listeners
            .unregister_all(ListenerKey::of(callback), |adapter| {
                self.transport.remove_listener(adapter)
            });
    }

    fn register(&self, scope: ScopeKey, callback: Listener) {
        let key = ListenerKey::of(&callback);
        let adapter_scope = scope.clone();
        self.listeners.register(
            key,
            scope,
            move || generic_adapter(adapter_scope, callback),
            |adapter| self.transport.add_listener(adapter.clone()),
        );
    }

    fn unregister(&self, scope: &ScopeKey, callback: &Listener) {
        self.listeners
            .unregister(ListenerKey::of(callback), scope, |adapter| {
                self.transport.remove_listener(adapter)
            });
    }
}

/// Build the one host-facing closure for a generic registration.
///
/// Generic listeners never observe page-addressed envelopes; those belong
/// to the page channel. Messages without a string `type` reach match-all
/// listeners only.
fn generic_adapter(scope: ScopeKey, callback: Listener) -> MessageAdapter {
    Arc::new(
        move |msg: Value, sender: MessageSender| -> BoxFuture<'static, Option<Value>> {
            let applies = !envelope::is_page_scoped(&msg)
                && match &scope {
                    ScopeKey::All => true,
                    ScopeKey::Topic(topic) => {
                        envelope::topic_of(&msg).is_some_and(|t| t == topic)
                    }
                };
            let response = if applies { callback(msg, sender) } else { None };
            Box::pin(std::future::ready(response))
        },
    )
}
