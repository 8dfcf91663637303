//! Playback-state reporter for tracked video tabs.
//!
//! Media events, DOM mutations and visibility changes only mark the state as
//! dirty; the reporter derives the snapshot once the burst is over and pushes
//! it when `is_playing|on_target_page|url` differs from what it last sent.
//! Navigations forget the last signature so the first state on a new page
//! always goes out.

use std::sync::Arc;

use duck_proto::protocol::{PlaybackSnapshot, SourceKind, TabEvent, TabRequest, TabResponse};
use duck_proto::sites::Sites;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::handle::Envelope;
use crate::single_flight::SingleFlight;
use crate::surface::VideoSurface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterSignal {
    /// play, pause, ended, waiting, volumechange and friends.
    Media,
    Mutation,
    Visibility,
}

pub struct Reporter {
    kind: SourceKind,
    sites: Arc<Sites>,
    video: Arc<dyn VideoSurface>,
    /// Runtime channel to the coordinator.  Closed means the extension
    /// context is gone.
    outbox: mpsc::Sender<TabEvent>,
    current_url: String,
    last_signature: Option<String>,
    flush: SingleFlight,
    disconnected: bool,
}

impl Reporter {
    pub fn new(
        kind: SourceKind,
        sites: Arc<Sites>,
        video: Arc<dyn VideoSurface>,
        outbox: mpsc::Sender<TabEvent>,
    ) -> Self {
        Self {
            kind,
            sites,
            video,
            outbox,
            current_url: String::new(),
            last_signature: None,
            flush: SingleFlight::new(),
            disconnected: false,
        }
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            is_playing: self.video.is_playing(),
            on_target_page: self.sites.is_video_page(self.kind, &self.current_url),
            url: self.current_url.clone(),
        }
    }

    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<Envelope>,
        mut signals: mpsc::Receiver<ReporterSignal>,
        mut navigation: watch::Receiver<String>,
    ) {
        self.current_url = navigation.borrow_and_update().clone();
        info!("Reporter[{}]: running on {}", self.kind, self.current_url);
        self.flush.schedule();

        let mut navigation_open = true;
        let mut signals_open = true;

        loop {
            tokio::select! {
                biased;

                changed = navigation.changed(), if navigation_open => match changed {
                    Ok(()) => {
                        let url = navigation.borrow_and_update().clone();
                        self.on_navigation(url);
                    }
                    Err(_) => navigation_open = false,
                },

                envelope = requests.recv() => {
                    let Some(envelope) = envelope else {
                        break;
                    };
                    match self.answer(&envelope.message) {
                        Some(response) => {
                            let _ = envelope.reply.send(response);
                        }
                        None => debug!("Reporter[{}]: not our message: {}", self.kind, envelope.message),
                    }
                }

                signal = signals.recv(), if signals_open => match signal {
                    Some(_) => {
                        self.flush.schedule();
                    }
                    None => signals_open = false,
                },

                _ = std::future::ready(()), if self.flush.is_scheduled() => {
                    self.flush.take();
                    self.push_state().await;
                }
            }
        }

        info!("Reporter[{}]: request channel closed, stopping", self.kind);
    }

    fn on_navigation(&mut self, url: String) {
        if url == self.current_url {
            return;
        }
        debug!("Reporter[{}]: navigated to {}", self.kind, url);
        self.current_url = url;
        self.last_signature = None;
        self.flush.schedule();
    }

    fn answer(&self, message: &Value) -> Option<TabResponse> {
        match serde_json::from_value::<TabRequest>(message.clone()) {
            Ok(TabRequest::GetState { source }) if source == self.kind => {
                Some(TabResponse::State(self.snapshot()))
            }
            _ => None,
        }
    }

    async fn push_state(&mut self) {
        if self.disconnected {
            return;
        }

        let snapshot = self.snapshot();
        let signature = format!(
            "{}|{}|{}",
            snapshot.is_playing, snapshot.on_target_page, snapshot.url
        );
        if self.last_signature.as_deref() == Some(signature.as_str()) {
            return;
        }
        self.last_signature = Some(signature);

        let event = TabEvent::PushState {
            source: self.kind,
            is_playing: snapshot.is_playing,
            on_target_page: snapshot.on_target_page,
            url: Some(snapshot.url),
        };
        if self.outbox.send(event).await.is_err() {
            warn!(
                "Reporter[{}]: extension context invalidated, no further state pushes",
                self.kind
            );
            self.disconnected = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::TabHandle;
    use duck_proto::config::SitesConfig;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const WATCH_URL: &str = "https://www.youtube.com/watch?v=abc";

    #[derive(Default)]
    struct Video {
        playing: AtomicBool,
    }

    impl VideoSurface for Video {
        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }
    }

    struct Tab {
        video: Arc<Video>,
        handle: TabHandle,
        signals: mpsc::Sender<ReporterSignal>,
        navigate: watch::Sender<String>,
        pushed: mpsc::Receiver<TabEvent>,
    }

    fn start(url: &str) -> Tab {
        let sites = Arc::new(Sites::from_config(&SitesConfig::default()).unwrap());
        let video = Arc::new(Video::default());
        let (outbox, pushed) = mpsc::channel(16);
        let (handle, requests) = TabHandle::channel(8);
        let (signals, signal_rx) = mpsc::channel(16);
        let (navigate, navigation) = watch::channel(url.to_string());

        let reporter = Reporter::new(SourceKind::YouTube, sites, video.clone(), outbox);
        tokio::spawn(reporter.run(requests, signal_rx, navigation));
        Tab {
            video,
            handle,
            signals,
            navigate,
            pushed,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn drain(rx: &mut mpsc::Receiver<TabEvent>) -> Vec<TabEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn push(is_playing: bool, on_target_page: bool, url: &str) -> TabEvent {
        TabEvent::PushState {
            source: SourceKind::YouTube,
            is_playing,
            on_target_page,
            url: Some(url.to_string()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state_pushed_once() {
        let mut tab = start(WATCH_URL);
        settle().await;
        assert_eq!(drain(&mut tab.pushed), vec![push(false, true, WATCH_URL)]);

        // Signals without a change push nothing.
        tab.signals.send(ReporterSignal::Visibility).await.unwrap();
        tab.signals.send(ReporterSignal::Mutation).await.unwrap();
        settle().await;
        assert!(drain(&mut tab.pushed).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_burst_coalesces_into_one_push() {
        let mut tab = start(WATCH_URL);
        settle().await;
        drain(&mut tab.pushed);

        tab.video.playing.store(true, Ordering::SeqCst);
        for _ in 0..5 {
            tab.signals.send(ReporterSignal::Media).await.unwrap();
        }
        settle().await;
        assert_eq!(drain(&mut tab.pushed), vec![push(true, true, WATCH_URL)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_resets_signature() {
        let mut tab = start(WATCH_URL);
        settle().await;
        drain(&mut tab.pushed);

        tab.navigate
            .send("https://www.youtube.com/feed/subscriptions".to_string())
            .unwrap();
        settle().await;
        assert_eq!(
            drain(&mut tab.pushed),
            vec![push(false, false, "https://www.youtube.com/feed/subscriptions")]
        );

        // Back to the same watch page: sent again even though identical to
        // the first push.
        tab.navigate.send(WATCH_URL.to_string()).unwrap();
        settle().await;
        assert_eq!(drain(&mut tab.pushed), vec![push(false, true, WATCH_URL)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_answers_get_state_for_own_source_only() {
        let tab = start(WATCH_URL);
        tab.video.playing.store(true, Ordering::SeqCst);

        let reply = tab
            .handle
            .send(&TabRequest::GetState {
                source: SourceKind::YouTube,
            })
            .await
            .unwrap();
        assert_eq!(
            reply,
            TabResponse::State(PlaybackSnapshot {
                is_playing: true,
                on_target_page: true,
                url: WATCH_URL.to_string(),
            })
        );

        let other = tab
            .handle
            .send(&TabRequest::GetState {
                source: SourceKind::Instagram,
            })
            .await;
        assert!(matches!(other, Err(crate::ActuatorError::NoResponse)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_pushing_once_context_is_gone() {
        let mut tab = start(WATCH_URL);
        settle().await;
        drain(&mut tab.pushed);
        tab.pushed.close();

        tab.video.playing.store(true, Ordering::SeqCst);
        tab.signals.send(ReporterSignal::Media).await.unwrap();
        settle().await;

        // Still answers direct requests.
        let reply = tab
            .handle
            .send(&TabRequest::GetState {
                source: SourceKind::YouTube,
            })
            .await
            .unwrap();
        assert!(matches!(reply, TabResponse::State(s) if s.is_playing));
    }
}
