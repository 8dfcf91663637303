use async_trait::async_trait;
use duck_proto::protocol::{TabId, TabInfo, TabRequest, TabScript};
use serde_json::Value;

use crate::error::SendError;

/// Everything the coordinator needs from the browser.
///
/// `send_to_tab` fails with [`SendError::NoReceiver`] when the tab has no
/// listener; replies are returned raw and interpreted by the caller.
#[async_trait]
pub trait Browser: Send + Sync {
    /// Open tabs whose URL matches any of `patterns`.
    async fn query_tabs(&self, patterns: &[String]) -> Result<Vec<TabInfo>, SendError>;

    /// The active tab of the last focused window.
    async fn active_tab(&self) -> Result<Option<TabInfo>, SendError>;

    async fn send_to_tab(&self, tab_id: TabId, message: &TabRequest) -> Result<Value, SendError>;

    async fn inject(&self, tab_id: TabId, script: TabScript) -> Result<(), SendError>;

    /// The raw stored mode preference, if the browser holds one.
    async fn read_mode(&self) -> Result<Option<String>, SendError>;
}
