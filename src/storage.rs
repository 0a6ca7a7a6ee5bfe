//! Promise-style wrapper over the host's `sync` and `local` storage areas.
//!
//! Method calls forward to the host area primitives. Change listeners run
//! through the same two-level registry as message listeners, with the area
//! as the scope key: a callback registered on [`Storage::add_listener`]
//! hears every area, one registered on an [`AreaHandle`] hears only its
//! own.

use std::collections::HashMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{Display, EnumString};

use crate::error::Result;
use crate::host::{ChangeAdapter, HostStorage};
use crate::registry::{ListenerKey, ListenerRegistry};

/// Host storage area.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Area {
    Sync,
    Local,
}

/// One key's transition as reported by a storage change event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageChange {
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Caller-supplied storage change handler. As with message listeners, the
/// `Arc` identity is the registration key.
pub type ChangeListener = Arc<dyn Fn(&HashMap<String, StorageChange>, Area) + Send + Sync>;

/// Scope of one change-listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AreaScope {
    All,
    Area(Area),
}

/// Storage facade over an injected host.
pub struct Storage {
    host: Arc<dyn HostStorage>,
    listeners: ListenerRegistry<AreaScope, ChangeAdapter>,
}

impl Storage {
    pub fn new(host: Arc<dyn HostStorage>) -> Self {
        Self {
            host,
            listeners: ListenerRegistry::new(),
        }
    }

    /// Handle on one storage area.
    pub fn area(&self, area: Area) -> AreaHandle<'_> {
        AreaHandle {
            storage: self,
            area,
        }
    }

    /// The `sync` area.
    pub fn sync(&self) -> AreaHandle<'_> {
        self.area(Area::Sync)
    }

    /// The `local` area.
    pub fn local(&self) -> AreaHandle<'_> {
        self.area(Area::Local)
    }

    /// Clear both areas.
    pub async fn clear_all(&self) -> Result<()> {
        self.host.clear(Area::Sync).await?;
        self.host.clear(Area::Local).await?;
        Ok(())
    }

    /// Register `callback` for change events from every area.
    pub fn add_listener(&self, callback: ChangeListener) {
        self.register(AreaScope::All, callback);
    }

    /// Drop the all-areas registration of `callback`, if any.
    pub fn remove_listener(&self, callback: &ChangeListener) {
        self.unregister(&AreaScope::All, callback);
    }

    /// Drop every registration of `callback`.
    pub fn remove_all_listeners(&self, callback: &ChangeListener) {
        self.listeners
            .unregister_all(ListenerKey::of(callback), |adapter| {
                self.host.remove_change_listener(adapter)
            });
    }

    fn register(&self, scope: AreaScope, callback: ChangeListener) {
        let key = ListenerKey::of(&callback);
        self.listeners.register(
            key,
            scope,
            move || change_adapter(scope, callback),
            |adapter| self.host.add_change_listener(adapter.clone()),
        );
    }

    fn unregister(&self, scope: &AreaScope, callback: &ChangeListener) {
        self.listeners
            .unregister(ListenerKey::of(callback), scope, |adapter| {
                self.host.remove_change_listener(adapter)
            });
    }
}

/// Host-facing closure for a change registration; filters on the area.
fn change_adapter(scope: AreaScope, callback: ChangeListener) -> ChangeAdapter {
    Arc::new(move |changes, area| {
        let applies = match scope {
            AreaScope::All => true,
            AreaScope::Area(own) => own == area,
        };
        if applies {
            callback(changes, area);
        }
    })
}

/// Promise-style view of one storage area.
pub struct AreaHandle<'a> {
    storage: &'a Storage,
    area: Area,
}

impl AreaHandle<'_> {
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.storage.host.get(self.area, key).await
    }

    pub async fn get_all(&self) -> Result<HashMap<String, Value>> {
        self.storage.host.get_all(self.area).await
    }

    pub async fn set(&self, items: HashMap<String, Value>) -> Result<()> {
        self.storage.host.set(self.area, items).await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.storage.host.remove(self.area, key).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.storage.host.clear(self.area).await
    }

    /// Register `callback` for change events from this area only.
    pub fn add_listener(&self, callback: ChangeListener) {
        self.storage.register(AreaScope::Area(self.area), callback);
    }

    /// Drop this area's registration of `callback`, if any.
    pub fn remove_listener(&self, callback: &ChangeListener) {
        self.storage.unregister(&AreaScope::Area(self.area), callback);
    }
}
