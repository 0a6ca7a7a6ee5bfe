//! Wire-level helpers for the page-addressed sub-protocol.
//!
//! Page-scoped traffic rides the same physical channel as generic
//! messages. It is distinguished on the wire by rewriting the logical
//! `type` into a delimiter-tagged form and attaching the sender's page
//! identity:
//!
//! ```json
//! { "type": "_&_MSG_1_&_", "__pageId__": 1, "prop": "value" }
//! ```
//!
//! Any message whose `type` does not match the delimiter pattern is
//! generic traffic. A logical type that itself contains the delimiter
//! sequence collides with this scheme; callers own their type names.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::host::TabInfo;

/// Delimiter wrapped around a logical type to mark page-scoped traffic.
pub const PAGE_TAG: &str = "_&_";

/// Envelope field carrying the sender's page identity.
pub const PAGE_ID_FIELD: &str = "__pageId__";

/// Reserved message type of the identity handshake request.
pub const PAGE_INFO_TYPE: &str = "__PAGE_INFO__";

/// Identity handed to contexts without an owning tab (popup, options page).
pub const POPUP_PAGE_ID: &str = "popup";

/// Identity of one logical page: its owning tab id, or a well-known name
/// for contexts that have no tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum PageId {
    Tab(i64),
    Name(String),
}

impl PageId {
    /// Whether a raw `__pageId__` value refers to this identity.
    pub fn matches(&self, raw: &Value) -> bool {
        match self {
            PageId::Tab(id) => raw.as_i64() == Some(*id),
            PageId::Name(name) => raw.as_str() == Some(name),
        }
    }
}

impl From<i64> for PageId {
    fn from(id: i64) -> Self {
        PageId::Tab(id)
    }
}

impl From<&str> for PageId {
    fn from(name: &str) -> Self {
        PageId::Name(name.to_owned())
    }
}

/// Identity handshake response: who the requesting page is, plus the
/// descriptive metadata the host knows about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PageInfo {
    #[serde(rename = "pageId")]
    pub page_id: PageId,
    #[serde(rename = "faviconURL")]
    pub favicon_url: Option<String>,
    #[serde(rename = "pageTitle")]
    pub page_title: Option<String>,
    #[serde(rename = "pageURL")]
    pub page_url: Option<String>,
}

impl PageInfo {
    /// Identity of a sender with an owning tab.
    pub fn from_tab(tab: &TabInfo) -> Self {
        Self {
            page_id: PageId::Tab(tab.id),
            favicon_url: tab.fav_icon_url.clone(),
            page_title: tab.title.clone(),
            page_url: tab.url.clone(),
        }
    }

    /// Sentinel identity for senders without an owning tab.
    pub fn popup() -> Self {
        Self {
            page_id: PageId::Name(POPUP_PAGE_ID.to_owned()),
            favicon_url: None,
            page_title: None,
            page_url: None,
        }
    }
}

/// Wrap a logical type in the page-scope delimiters.
pub fn tag_type(logical: &str) -> String {
    format!("{PAGE_TAG}{logical}{PAGE_TAG}")
}

/// Recover the logical type from a tagged one. `None` when the input is
/// not tagged, i.e. generic traffic.
pub fn untag_type(tagged: &str) -> Option<&str> {
    let inner = tagged.strip_prefix(PAGE_TAG)?.strip_suffix(PAGE_TAG)?;
    if inner.is_empty() { None } else { Some(inner) }
}

/// The message's topic: its `type` field, when that is a string.
pub fn topic_of(msg: &Value) -> Option<&str> {
    msg.get("type").and_then(Value::as_str)
}

/// True for envelopes belonging to the page-addressed sub-protocol, which
/// generic listeners must never observe.
pub fn is_page_scoped(msg: &Value) -> bool {
    msg.get(PAGE_ID_FIELD).is_some()
        || topic_of(msg).is_some_and(|t| untag_type(t).is_some())
}

/// Rewrite a tagged envelope's `type` to its logical form, leaving the
/// identity field in place. This is the shape the relay forwards.
pub fn untag_envelope(msg: &Value) -> Value {
    let mut out = msg.clone();
    if let Some(plain) = topic_of(msg).and_then(untag_type) {
        let plain = plain.to_owned();
        if let Some(obj) = out.as_object_mut() {
            obj.insert("type".to_owned(), Value::String(plain));
        }
    }
    out
}

/// Remove the routing metadata before a payload reaches a consumer
/// callback: drop `__pageId__` and untag the `type`.
pub fn strip_routing(msg: &Value) -> Value {
    let mut out = untag_envelope(msg);
    if let Some(obj) = out.as_object_mut() {
        obj.remove(PAGE_ID_FIELD);
    }
    out
}
