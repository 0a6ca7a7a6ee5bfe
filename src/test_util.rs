//! In-process host doubles for exercising the facades without a browser.
//!
//! [`MockBrowser`] implements all three host traits. Broadcasts and
//! targeted sends loop back into the registered adapters, so several
//! facades sharing one mock behave like extension contexts sharing one
//! runtime: a client messenger's handshake is answered by a server
//! messenger registered on the same mock, and relayed envelopes come back
//! around to the client's page listeners. Tests can also push events in
//! directly with [`MockBrowser::dispatch_message`], playing the role of
//! the host event source.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::envelope;
use crate::error::{Error, Result};
use crate::host::{
    ChangeAdapter, HostStorage, HostTabs, HostTransport, MessageAdapter, MessageSender, TabId,
    TabInfo,
};
use crate::storage::{Area, StorageChange};

/// One send accepted by the mock transport.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    /// `None` for broadcasts, the tab id for targeted sends.
    pub target: Option<TabId>,
    pub message: Value,
}

/// Scriptable in-process host.
#[derive(Default)]
pub struct MockBrowser {
    message_adapters: Mutex<Vec<MessageAdapter>>,
    message_adds: AtomicUsize,
    message_removes: AtomicUsize,
    sent: Mutex<Vec<SentMessage>>,
    responders: Mutex<HashMap<String, Value>>,
    fail_reason: Mutex<Option<String>>,
    local_sender: Mutex<MessageSender>,

    change_adapters: Mutex<Vec<ChangeAdapter>>,
    change_adds: AtomicUsize,
    change_removes: AtomicUsize,
    data: Mutex<HashMap<Area, HashMap<String, Value>>>,

    tabs: Mutex<Vec<TabInfo>>,
    highlighted: Mutex<Vec<u32>>,
    created: Mutex<Vec<String>>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything accepted by the transport so far, in order.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Answer broadcasts of `topic` with `response` when no registered
    /// adapter responds first. Stands in for a context this mock does not
    /// model, e.g. a scripted handshake server.
    pub fn respond_to(&self, topic: &str, response: Value) {
        self.responders
            .lock()
            .unwrap()
            .insert(topic.to_owned(), response);
    }

    /// Make every subsequent send fail with `reason`.
    pub fn fail_sends(&self, reason: &str) {
        *self.fail_reason.lock().unwrap() = Some(reason.to_owned());
    }

    /// Sender identity attached to looped-back sends from this context.
    pub fn set_local_sender(&self, sender: MessageSender) {
        *self.local_sender.lock().unwrap() = sender;
    }

    pub fn message_listener_count(&self) -> usize {
        self.message_adapters.lock().unwrap().len()
    }

    pub fn message_add_calls(&self) -> usize {
        self.message_adds.load(Ordering::SeqCst)
    }

    pub fn message_remove_calls(&self) -> usize {
        self.message_removes.load(Ordering::SeqCst)
    }

    pub fn change_listener_count(&self) -> usize {
        self.change_adapters.lock().unwrap().len()
    }

    pub fn change_add_calls(&self) -> usize {
        self.change_adds.load(Ordering::SeqCst)
    }

    pub fn change_remove_calls(&self) -> usize {
        self.change_removes.load(Ordering::SeqCst)
    }

    /// Deliver a message event to every registered adapter, as the host
    /// would, returning the first response.
    pub async fn dispatch_message(&self, msg: Value, sender: MessageSender) -> Option<Value> {
        let adapters: Vec<MessageAdapter> = self.message_adapters.lock().unwrap().clone();
        let mut response = None;
        for adapter in adapters {
            let out = adapter(msg.clone(), sender.clone()).await;
            if response.is_none() {
                response = out;
            }
        }
        response
    }

    /// Deliver a storage change event to every registered change adapter.
    pub fn dispatch_storage_change(&self, changes: &HashMap<String, StorageChange>, area: Area) {
        let adapters: Vec<ChangeAdapter> = self.change_adapters.lock().unwrap().clone();
        for adapter in adapters {
            adapter(changes, area);
        }
    }

    /// Pre-populate the tab list.
    pub fn add_tab(&self, tab: TabInfo) {
        self.tabs.lock().unwrap().push(tab);
    }

    /// Indices passed to `highlight`, in order.
    pub fn highlighted(&self) -> Vec<u32> {
        self.highlighted.lock().unwrap().clone()
    }

    /// URLs passed to `create`, in order.
    pub fn created(&self) -> Vec<String> {
        self.created.lock().unwrap().clone()
    }

    fn check_send(&self) -> Result<()> {
        match self.fail_reason.lock().unwrap().clone() {
            Some(reason) => Err(Error::Transport(reason)),
            None => Ok(()),
        }
    }

    fn current_sender(&self) -> MessageSender {
        self.local_sender.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostTransport for MockBrowser {
    async fn broadcast(&self, msg: Value) -> Result<Value> {
        self.check_send()?;
        self.sent.lock().unwrap().push(SentMessage {
            target: None,
            message: msg.clone(),
        });
        if let Some(response) = self.dispatch_message(msg.clone(), self.current_sender()).await {
            return Ok(response);
        }
        let canned = envelope::topic_of(&msg)
            .and_then(|topic| self.responders.lock().unwrap().get(topic).cloned());
        Ok(canned.unwrap_or(Value::Null))
    }

    async fn send_to_tab(&self, tab: TabId, msg: Value) -> Result<Value> {
        self.check_send()?;
        self.sent.lock().unwrap().push(SentMessage {
            target: Some(tab),
            message: msg.clone(),
        });
        let response = self.dispatch_message(msg, self.current_sender()).await;
        Ok(response.unwrap_or(Value::Null))
    }

    fn add_listener(&self, adapter: MessageAdapter) {
        self.message_adds.fetch_add(1, Ordering::SeqCst);
        self.message_adapters.lock().unwrap().push(adapter);
    }

    fn remove_listener(&self, adapter: &MessageAdapter) {
        self.message_removes.fetch_add(1, Ordering::SeqCst);
        self.message_adapters
            .lock()
            .unwrap()
            .retain(|held| !Arc::ptr_eq(held, adapter));
    }
}

#[async_trait]
impl HostStorage for MockBrowser {
    async fn get(&self, area: Area, key: &str) -> Result<Option<Value>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .get(&area)
            .and_then(|slot| slot.get(key))
            .cloned())
    }

    async fn get_all(&self, area: Area) -> Result<HashMap<String, Value>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .get(&area)
            .cloned()
            .unwrap_or_default())
    }

    async fn set(&self, area: Area, items: HashMap<String, Value>) -> Result<()> {
        let mut changes = HashMap::new();
        {
            let mut data = self.data.lock().unwrap();
            let slot = data.entry(area).or_default();
            for (key, value) in items {
                let old = slot.insert(key.clone(), value.clone());
                changes.insert(
                    key,
                    StorageChange {
                        old_value: old,
                        new_value: Some(value),
                    },
                );
            }
        }
        if !changes.is_empty() {
            self.dispatch_storage_change(&changes, area);
        }
        Ok(())
    }

    async fn remove(&self, area: Area, key: &str) -> Result<()> {
        let removed = self
            .data
            .lock()
            .unwrap()
            .get_mut(&area)
            .and_then(|slot| slot.remove(key));
        if let Some(old) = removed {
            let changes = HashMap::from([(
                key.to_owned(),
                StorageChange {
                    old_value: Some(old),
                    new_value: None,
                },
            )]);
            self.dispatch_storage_change(&changes, area);
        }
        Ok(())
    }

    async fn clear(&self, area: Area) -> Result<()> {
        let removed = self.data.lock().unwrap().remove(&area).unwrap_or_default();
        let changes: HashMap<String, StorageChange> = removed
            .into_iter()
            .map(|(key, old)| {
                (
                    key,
                    StorageChange {
                        old_value: Some(old),
                        new_value: None,
                    },
                )
            })
            .collect();
        if !changes.is_empty() {
            self.dispatch_storage_change(&changes, area);
        }
        Ok(())
    }

    fn add_change_listener(&self, adapter: ChangeAdapter) {
        self.change_adds.fetch_add(1, Ordering::SeqCst);
        self.change_adapters.lock().unwrap().push(adapter);
    }

    fn remove_change_listener(&self, adapter: &ChangeAdapter) {
        self.change_removes.fetch_add(1, Ordering::SeqCst);
        self.change_adapters
            .lock()
            .unwrap()
            .retain(|held| !Arc::ptr_eq(held, adapter));
    }
}

#[async_trait]
impl HostTabs for MockBrowser {
    async fn query(&self, url: &str) -> Result<Vec<TabInfo>> {
        Ok(self
            .tabs
            .lock()
            .unwrap()
            .iter()
            .filter(|tab| tab.url.as_deref() == Some(url))
            .cloned()
            .collect())
    }

    async fn highlight(&self, index: u32) -> Result<()> {
        self.highlighted.lock().unwrap().push(index);
        Ok(())
    }

    async fn create(&self, url: &str) -> Result<TabInfo> {
        let mut tabs = self.tabs.lock().unwrap();
        let tab = TabInfo {
            id: tabs.len() as TabId + 100,
            index: tabs.len() as u32,
            title: None,
            url: Some(url.to_owned()),
            fav_icon_url: None,
        };
        tabs.push(tab.clone());
        self.created.lock().unwrap().push(url.to_owned());
        Ok(tab)
    }
}
