//! Delivery of treatments to player tabs and state requests to video tabs.
//!
//! Every tab message goes through [`Dispatcher::send_with_recovery`]: when a
//! tab has no listener the matching in-tab script is injected once and the
//! message is sent exactly once more.

use std::sync::Arc;

use duck_proto::protocol::{
    reply_snapshot, reply_succeeded, PlaybackSnapshot, SourceKind, TabId, TabInfo, TabRequest,
    TabScript,
};
use duck_proto::sites::Sites;
use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::browser::Browser;
use crate::error::SendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackIntent {
    Pause,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    SetVolume(f64),
    SetPlayback(PlaybackIntent),
}

impl Command {
    fn to_request(self) -> TabRequest {
        match self {
            Command::SetVolume(value) => TabRequest::SetVolume { value },
            Command::SetPlayback(PlaybackIntent::Pause) => TabRequest::PauseSource,
            Command::SetPlayback(PlaybackIntent::Resume) => TabRequest::ResumeSource,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastOutcome {
    /// At least one player tab acknowledged the command.
    pub applied: bool,
    /// There was no player tab to send to.
    pub no_target_tabs: bool,
}

impl BroadcastOutcome {
    /// Nothing left to retry: either applied or moot.
    pub fn settled(&self) -> bool {
        self.applied || self.no_target_tabs
    }
}

pub struct Dispatcher {
    browser: Arc<dyn Browser>,
    sites: Arc<Sites>,
}

impl Dispatcher {
    pub fn new(browser: Arc<dyn Browser>, sites: Arc<Sites>) -> Self {
        Self { browser, sites }
    }

    pub async fn send_with_recovery(
        &self,
        tab_id: TabId,
        request: &TabRequest,
        script: TabScript,
    ) -> Result<Value, SendError> {
        match self.browser.send_to_tab(tab_id, request).await {
            Err(SendError::NoReceiver) => {
                debug!("Dispatcher: no receiver in tab {}, injecting {:?}", tab_id, script);
                if let Err(e) = self.browser.inject(tab_id, script).await {
                    warn!("Dispatcher: failed to inject {:?} into tab {}: {}", script, tab_id, e);
                    return Err(SendError::NoReceiver);
                }
                self.browser.send_to_tab(tab_id, request).await
            }
            other => other,
        }
    }

    /// Sends one command to one player tab. `true` iff the tab acknowledged.
    pub async fn deliver(&self, tab_id: TabId, command: Command) -> bool {
        let request = command.to_request();
        match self
            .send_with_recovery(tab_id, &request, TabScript::Actuator)
            .await
        {
            Ok(reply) => {
                let ok = reply_succeeded(&reply);
                debug!("Dispatcher: tab {} {:?} -> success={}", tab_id, command, ok);
                ok
            }
            Err(e) => {
                warn!("Dispatcher: unable to apply {:?} in tab {}: {}", command, tab_id, e);
                false
            }
        }
    }

    /// Sends `command` to every open player tab concurrently.
    pub async fn broadcast(&self, command: Command) -> Result<BroadcastOutcome, SendError> {
        let patterns = self.sites.player().raw_patterns();
        let tabs = self.browser.query_tabs(&patterns).await?;
        if tabs.is_empty() {
            debug!("Dispatcher: no player tabs for {:?}", command);
            return Ok(BroadcastOutcome {
                applied: false,
                no_target_tabs: true,
            });
        }

        let results = join_all(tabs.iter().map(|tab| self.deliver(tab.id, command))).await;
        let applied = results.into_iter().any(|ok| ok);
        if !applied {
            warn!("Dispatcher: no player tab accepted {:?}", command);
        }
        Ok(BroadcastOutcome {
            applied,
            no_target_tabs: false,
        })
    }

    /// Pulls a video tab's playback state. `None` when the tab could not be
    /// reached or answered with something unusable.
    pub async fn request_state(&self, tab_id: TabId, kind: SourceKind) -> Option<PlaybackSnapshot> {
        let request = TabRequest::GetState { source: kind };
        match self
            .send_with_recovery(tab_id, &request, TabScript::Reporter(kind))
            .await
        {
            Ok(reply) => {
                let snapshot = reply_snapshot(&reply);
                if snapshot.is_none() {
                    debug!("Dispatcher: malformed state reply from tab {}: {}", tab_id, reply);
                }
                snapshot
            }
            Err(e) => {
                debug!("Dispatcher: state of tab {} unavailable: {}", tab_id, e);
                None
            }
        }
    }

    pub async fn tracked_tabs(&self, kind: SourceKind) -> Result<Vec<TabInfo>, SendError> {
        let patterns = self.sites.tracked(kind).raw_patterns();
        self.browser.query_tabs(&patterns).await
    }

    pub async fn active_tab(&self) -> Result<Option<TabInfo>, SendError> {
        self.browser.active_tab().await
    }

    pub async fn read_mode(&self) -> Result<Option<String>, SendError> {
        self.browser.read_mode().await
    }

    /// Installs the in-tab scripts into every already-open tab of a known
    /// site. Failures are logged and otherwise ignored.
    pub async fn inject_existing_tabs(&self) {
        let tabs = match self.browser.query_tabs(&self.sites.all_patterns()).await {
            Ok(tabs) => tabs,
            Err(e) => {
                warn!("Dispatcher: failed to list open tabs for injection: {}", e);
                return;
            }
        };

        let mut jobs = Vec::new();
        for tab in &tabs {
            for kind in SourceKind::ALL {
                if self.sites.is_tracked_url(kind, &tab.url) {
                    jobs.push((tab.id, TabScript::Reporter(kind)));
                }
            }
            if self.sites.is_player_url(&tab.url) {
                jobs.push((tab.id, TabScript::Actuator));
            }
        }

        let results = join_all(jobs.iter().map(|(tab_id, script)| async move {
            (*tab_id, *script, self.browser.inject(*tab_id, *script).await)
        }))
        .await;
        let mut injected = 0usize;
        for (tab_id, script, result) in results {
            match result {
                Ok(()) => injected += 1,
                Err(e) => warn!("Dispatcher: failed to inject {:?} into tab {}: {}", script, tab_id, e),
            }
        }
        info!("Dispatcher: injected scripts into {}/{} open tabs", injected, jobs.len());
    }
}
