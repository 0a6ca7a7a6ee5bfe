//! Seams to the host extension platform.
//!
//! Nothing in this crate talks to a real browser. Everything it needs from
//! the platform -- the message transport, per-area storage, tab management --
//! is expressed as a trait here and injected by the embedder, or by
//! [`MockBrowser`](crate::test_util::MockBrowser) in tests.
//!
//! The listener primitives accept exactly one function shape, the adapter.
//! Adapters are generated internally, one per (callback, scope)
//! registration; callers never see or manage them. Removal identifies an
//! adapter by its `Arc` address, mirroring remove-by-function-identity on
//! the host side.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::storage::{Area, StorageChange};

/// Identifier of a browser tab.
pub type TabId = i64;

/// Host tab descriptor, as attached to message events and returned by tab
/// queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    #[serde(default)]
    pub index: u32,
    pub title: Option<String>,
    pub url: Option<String>,
    pub fav_icon_url: Option<String>,
}

/// Metadata accompanying a host-delivered message event.
#[derive(Debug, Clone, Default)]
pub struct MessageSender {
    /// Owning tab, present when the message originated from a tab context.
    pub tab: Option<TabInfo>,
}

/// The one function shape the host transport accepts for message events.
///
/// A returned `Some(value)` is the listener's response to the sender; the
/// transport resolves the sender's call with the first response it gets.
pub type MessageAdapter =
    Arc<dyn Fn(Value, MessageSender) -> BoxFuture<'static, Option<Value>> + Send + Sync>;

/// The function shape the host storage accepts for change events.
pub type ChangeAdapter = Arc<dyn Fn(&HashMap<String, StorageChange>, Area) + Send + Sync>;

/// Message transport of the host platform.
#[async_trait]
pub trait HostTransport: Send + Sync {
    /// Broadcast to every context of the extension runtime. Resolves with
    /// the first listener response, or `Value::Null` when nobody responds.
    async fn broadcast(&self, msg: Value) -> Result<Value>;

    /// Send to the contexts of one specific tab.
    async fn send_to_tab(&self, tab: TabId, msg: Value) -> Result<Value>;

    /// Register `adapter` for incoming message events.
    fn add_listener(&self, adapter: MessageAdapter);

    /// Deregister a previously added adapter.
    fn remove_listener(&self, adapter: &MessageAdapter);
}

/// Key-value storage of the host platform.
#[async_trait]
pub trait HostStorage: Send + Sync {
    async fn get(&self, area: Area, key: &str) -> Result<Option<Value>>;

    async fn get_all(&self, area: Area) -> Result<HashMap<String, Value>>;

    async fn set(&self, area: Area, items: HashMap<String, Value>) -> Result<()>;

    async fn remove(&self, area: Area, key: &str) -> Result<()>;

    async fn clear(&self, area: Area) -> Result<()>;

    /// Register `adapter` for `(changes, area)` change events.
    fn add_change_listener(&self, adapter: ChangeAdapter);

    /// Deregister a previously added change adapter.
    fn remove_change_listener(&self, adapter: &ChangeAdapter);
}

/// Tab management of the host platform.
#[async_trait]
pub trait HostTabs: Send + Sync {
    /// Tabs whose URL matches `url` exactly.
    async fn query(&self, url: &str) -> Result<Vec<TabInfo>>;

    /// Bring the tab at `index` to the foreground.
    async fn highlight(&self, index: u32) -> Result<()>;

    /// Open a new tab on `url`.
    async fn create(&self, url: &str) -> Result<TabInfo>;
}
