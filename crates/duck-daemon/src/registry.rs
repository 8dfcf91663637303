//! Last-known playback state per `(tab, source kind)`.
//!
//! An entry only exists while its tab's URL matches the kind's site: pushes
//! from elsewhere are dropped and navigating off-site removes the entry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use duck_proto::protocol::{PlaybackSnapshot, SourceKind, TabId};
use duck_proto::sites::Sites;
use tracing::debug;

use crate::dispatch::Dispatcher;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPlaybackState {
    pub source: SourceKind,
    pub tab_id: TabId,
    pub is_playing: bool,
    pub on_target_page: bool,
    pub page_url: String,
    pub updated_at: DateTime<Utc>,
}

pub struct Registry {
    sites: Arc<Sites>,
    entries: HashMap<(TabId, SourceKind), TrackedPlaybackState>,
}

impl Registry {
    pub fn new(sites: Arc<Sites>) -> Self {
        Self {
            sites,
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, tab_id: TabId, kind: SourceKind) -> Option<&TrackedPlaybackState> {
        self.entries.get(&(tab_id, kind))
    }

    pub fn states(&self) -> impl Iterator<Item = &TrackedPlaybackState> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Stores a state reported by the tab itself. Returns `false` when the
    /// reported URL is not on the kind's site and the push was dropped.
    pub fn record_push(&mut self, tab_id: TabId, kind: SourceKind, snapshot: PlaybackSnapshot) -> bool {
        if !self.sites.is_tracked_url(kind, &snapshot.url) {
            debug!(
                "Registry: dropping {} push from tab {} for off-site url {:?}",
                kind, tab_id, snapshot.url
            );
            self.entries.remove(&(tab_id, kind));
            return false;
        }
        self.store(tab_id, kind, snapshot);
        true
    }

    /// Asks the tab for its current state, falling back to the cached entry
    /// when the tab cannot answer.
    pub async fn record_pull(
        &mut self,
        tab_id: TabId,
        kind: SourceKind,
        dispatcher: &Dispatcher,
    ) -> Option<TrackedPlaybackState> {
        let pulled = dispatcher.request_state(tab_id, kind).await;
        self.apply_pull(tab_id, kind, pulled)
    }

    /// Folds the result of a `GetState` round trip into the registry.
    pub fn apply_pull(
        &mut self,
        tab_id: TabId,
        kind: SourceKind,
        pulled: Option<PlaybackSnapshot>,
    ) -> Option<TrackedPlaybackState> {
        match pulled {
            // An empty URL means the tab did not say; the query that led
            // here already matched it against the site.
            Some(snapshot)
                if snapshot.url.is_empty() || self.sites.is_tracked_url(kind, &snapshot.url) =>
            {
                self.store(tab_id, kind, snapshot);
            }
            Some(snapshot) => {
                debug!(
                    "Registry: tab {} reported off-site url {:?}, forgetting {}",
                    tab_id, snapshot.url, kind
                );
                self.entries.remove(&(tab_id, kind));
            }
            None => {}
        }
        self.entries.get(&(tab_id, kind)).cloned()
    }

    pub fn forget(&mut self, tab_id: TabId) {
        self.entries.retain(|(id, _), _| *id != tab_id);
    }

    /// The tab's URL changed. Entries whose site no longer matches are
    /// removed; the rest are marked not playing until the tab reports again.
    pub fn on_navigated_away(&mut self, tab_id: TabId, new_url: &str) {
        for kind in SourceKind::ALL {
            let key = (tab_id, kind);
            if !self.entries.contains_key(&key) {
                continue;
            }
            if !self.sites.is_tracked_url(kind, new_url) {
                debug!("Registry: tab {} left {}, forgetting", tab_id, kind);
                self.entries.remove(&key);
                continue;
            }
            let on_target_page = self.sites.is_video_page(kind, new_url);
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.is_playing = false;
                entry.on_target_page = on_target_page;
                entry.page_url = new_url.to_string();
                entry.updated_at = Utc::now();
            }
        }
    }

    fn store(&mut self, tab_id: TabId, kind: SourceKind, snapshot: PlaybackSnapshot) {
        self.entries.insert(
            (tab_id, kind),
            TrackedPlaybackState {
                source: kind,
                tab_id,
                is_playing: snapshot.is_playing,
                on_target_page: snapshot.on_target_page,
                page_url: snapshot.url,
                updated_at: Utc::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duck_proto::config::SitesConfig;

    const WATCH: &str = "https://www.youtube.com/watch?v=abc";

    fn registry() -> Registry {
        Registry::new(Arc::new(Sites::from_config(&SitesConfig::default()).unwrap()))
    }

    fn snapshot(is_playing: bool, url: &str) -> PlaybackSnapshot {
        PlaybackSnapshot {
            is_playing,
            on_target_page: true,
            url: url.to_string(),
        }
    }

    #[test]
    fn test_push_overwrites() {
        let mut reg = registry();
        assert!(reg.record_push(2, SourceKind::YouTube, snapshot(true, WATCH)));
        assert!(reg.record_push(2, SourceKind::YouTube, snapshot(false, WATCH)));
        assert_eq!(reg.len(), 1);
        assert!(!reg.get(2, SourceKind::YouTube).unwrap().is_playing);
    }

    #[test]
    fn test_off_site_push_dropped() {
        let mut reg = registry();
        assert!(!reg.record_push(2, SourceKind::YouTube, snapshot(true, "https://example.com/")));
        assert!(!reg.record_push(2, SourceKind::Instagram, snapshot(true, WATCH)));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_navigation_within_site_resets_playing() {
        let mut reg = registry();
        reg.record_push(2, SourceKind::YouTube, snapshot(true, WATCH));
        reg.on_navigated_away(2, "https://www.youtube.com/feed/subscriptions");

        let entry = reg.get(2, SourceKind::YouTube).unwrap();
        assert!(!entry.is_playing);
        assert!(!entry.on_target_page);
        assert_eq!(entry.page_url, "https://www.youtube.com/feed/subscriptions");
    }

    #[test]
    fn test_navigation_off_site_forgets() {
        let mut reg = registry();
        reg.record_push(2, SourceKind::YouTube, snapshot(true, WATCH));
        reg.on_navigated_away(2, "https://example.com/");
        assert!(reg.is_empty());
    }

    #[test]
    fn test_navigation_does_not_create_entries() {
        let mut reg = registry();
        reg.on_navigated_away(5, WATCH);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_forget_removes_every_kind() {
        let mut reg = registry();
        reg.record_push(2, SourceKind::YouTube, snapshot(true, WATCH));
        reg.record_push(3, SourceKind::YouTube, snapshot(true, WATCH));
        reg.forget(2);
        assert!(reg.get(2, SourceKind::YouTube).is_none());
        assert!(reg.get(3, SourceKind::YouTube).is_some());
    }

    #[test]
    fn test_failed_pull_keeps_cache() {
        let mut reg = registry();
        reg.record_push(2, SourceKind::YouTube, snapshot(true, WATCH));
        let cached = reg.apply_pull(2, SourceKind::YouTube, None).unwrap();
        assert!(cached.is_playing);
        assert!(reg.apply_pull(9, SourceKind::YouTube, None).is_none());

        let fresh = reg
            .apply_pull(2, SourceKind::YouTube, Some(snapshot(false, "")))
            .unwrap();
        assert!(!fresh.is_playing);
    }
}
