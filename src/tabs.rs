//! Open-or-focus helper over the host tab API.

use tracing::debug;

use crate::error::Result;
use crate::host::{HostTabs, TabInfo};

/// Bring a tab showing `url` to the foreground, opening one if none
/// exists. Exact-URL query; the first match wins.
pub async fn open_url(tabs: &dyn HostTabs, url: &str) -> Result<TabInfo> {
    let matching = tabs.query(url).await?;
    match matching.into_iter().next() {
        Some(tab) => {
            debug!(%url, tab = tab.id, "focusing existing tab");
            tabs.highlight(tab.index).await?;
            Ok(tab)
        }
        None => {
            debug!(%url, "opening new tab");
            tabs.create(url).await
        }
    }
}
