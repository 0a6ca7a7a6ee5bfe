//! Promise-style compatibility layer over a WebExtension-like host
//! platform: async storage, page-aware messaging and tab helpers.
//!
//! The host is reached only through the traits in [`host`]; nothing here
//! touches a real browser. [`Messenger`] unifies broadcast and targeted
//! sends behind one call shape and routes incoming messages through a
//! topic-keyed listener registry; its page channel adds per-page
//! addressing on the same physical transport, so many logical pages share
//! one channel without cross-talk. [`Storage`] wraps the `sync`/`local`
//! areas, and [`tabs::open_url`] covers the open-or-focus pattern.
//!
//! ```no_run
//! use std::sync::Arc;
//! use extbus::Messenger;
//! use serde_json::json;
//!
//! # async fn example(transport: Arc<dyn extbus::host::HostTransport>) -> extbus::Result<()> {
//! let messenger = Messenger::new(transport);
//! messenger.init_client().await?;
//! messenger.page_send(json!({ "type": "REFRESH" })).await?;
//! # Ok(())
//! # }
//! ```

pub mod envelope;
pub mod error;
pub mod host;
pub mod logger;
pub mod message;
pub mod registry;
pub mod storage;
pub mod tabs;

#[cfg(feature = "test-utils")]
pub mod test_util;

pub use envelope::{PageId, PageInfo};
pub use error::{Error, Result};
pub use message::{Listener, Messenger};
pub use storage::{Area, ChangeListener, Storage, StorageChange};
