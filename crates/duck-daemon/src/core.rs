//! CoordinatorCore: single-owner event loop for all coordinator state.
//!
//! Browser events (forwarded by the bridge), timer firings from the
//! scheduler and bridge connection changes all arrive as
//! `CoordinatorEvent`s on one channel.  CoordinatorCore owns the registry,
//! the memoised treatment and the mode exclusively; handlers run to
//! completion, awaiting tab round trips inline.
//!
//! Evaluation is debounced: every trigger re-arms the scheduler and only the
//! last one in a burst runs `evaluate`.  A treatment that did not reach any
//! player tab arms the retry timer, which re-enters the debounced path.
use std::sync::Arc;

use duck_proto::config::{ArbitrationPolicy, Config, PolicyConfig, VolumeConfig};
use duck_proto::mode::{Mode, ModeStore};
use duck_proto::protocol::{
    BrowserEvent, PlaybackSnapshot, SourceKind, TabEvent, TabId, TabStatus,
};
use duck_proto::sites::Sites;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::browser::Browser;
use crate::dispatch::{Command, Dispatcher, PlaybackIntent};
use crate::policy::{self, Treatment};
use crate::registry::Registry;
use crate::scheduler::{Scheduler, TimerKind};

// ── CoordinatorEvent ──────────────────────────────────────────────────────────

/// All inputs into the CoordinatorCore loop.
#[derive(Debug)]
pub enum CoordinatorEvent {
    /// Something happened in the browser.
    Browser(BrowserEvent),
    /// A debounce or retry timer elapsed.
    TimerFired { kind: TimerKind, generation: u64 },
    /// A bridge connected; tab state may have been lost in between.
    BridgeConnected,
    BridgeDisconnected,
    /// Shutdown requested.
    Shutdown,
}

// ── CoordinatorCore ───────────────────────────────────────────────────────────

pub struct CoordinatorCore {
    sites: Arc<Sites>,
    volume: VolumeConfig,
    policy: PolicyConfig,
    registry: Registry,
    dispatcher: Dispatcher,
    scheduler: Scheduler,
    mode_store: Arc<dyn ModeStore>,
    mode: Mode,
    /// Volume late-opened player tabs should start at.
    desired_volume: f64,
    /// Last volume every player tab is known to have (or there were none).
    last_broadcast_volume: Option<f64>,
    /// Last pause/resume that settled. `None` after a mode switch.
    last_pause_state: Option<bool>,
    active_tab: Option<TabId>,
}

impl CoordinatorCore {
    pub fn new(
        config: &Config,
        browser: Arc<dyn Browser>,
        mode_store: Arc<dyn ModeStore>,
        event_tx: mpsc::Sender<CoordinatorEvent>,
    ) -> anyhow::Result<Self> {
        let sites = Arc::new(Sites::from_config(&config.sites)?);
        Ok(Self {
            registry: Registry::new(sites.clone()),
            dispatcher: Dispatcher::new(browser, sites.clone()),
            scheduler: Scheduler::new(config.timing.debounce(), config.timing.retry(), event_tx),
            sites,
            volume: config.volume.clone(),
            policy: config.policy.clone(),
            mode_store,
            mode: Mode::Duck,
            desired_volume: config.volume.full,
            last_broadcast_volume: None,
            last_pause_state: None,
            active_tab: None,
        })
    }

    /// Run the event loop until `Shutdown`.  The scheduler holds a sender of
    /// its own, so the channel never closes while the core is alive.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<CoordinatorEvent>) -> anyhow::Result<()> {
        info!("Coordinator: starting event loop");
        self.startup().await;

        loop {
            let evt = event_rx.recv().await;
            match evt {
                None => {
                    info!("Coordinator: event channel closed, shutting down");
                    break;
                }

                Some(CoordinatorEvent::Shutdown) => {
                    info!("Coordinator: shutdown requested");
                    break;
                }

                Some(CoordinatorEvent::Browser(event)) => {
                    self.handle_browser_event(event).await;
                }

                Some(CoordinatorEvent::TimerFired { kind, generation }) => {
                    if !self.scheduler.accept(kind, generation) {
                        continue;
                    }
                    match kind {
                        TimerKind::Evaluation => self.evaluate().await,
                        TimerKind::Retry => {
                            debug!("Coordinator: retrying treatment");
                            self.scheduler.schedule_evaluation();
                        }
                    }
                }

                Some(CoordinatorEvent::BridgeConnected) => {
                    info!("Coordinator: bridge connected");
                    self.startup().await;
                }

                Some(CoordinatorEvent::BridgeDisconnected) => {
                    info!("Coordinator: bridge disconnected, dropping tab state");
                    self.registry.clear();
                    self.active_tab = None;
                    self.scheduler.clear_retry();
                }
            }
        }

        Ok(())
    }

    // ── browser events ────────────────────────────────────────────────────────

    async fn handle_browser_event(&mut self, event: BrowserEvent) {
        match event {
            BrowserEvent::Startup => self.startup().await,

            BrowserEvent::TabActivated { tab_id } => {
                self.active_tab = Some(tab_id);
                self.scheduler.schedule_evaluation();
            }

            BrowserEvent::TabUpdated {
                tab_id,
                url,
                status,
                tab_url,
            } => {
                let next_url = url.clone().or(tab_url).unwrap_or_default();
                if url.is_some() {
                    self.registry.on_navigated_away(tab_id, &next_url);
                }

                let is_player = self.sites.is_player_url(&next_url);
                if is_player && status == Some(TabStatus::Complete) {
                    self.send_desired_volume(tab_id).await;
                }

                if self.active_tab == Some(tab_id) || url.is_some() || is_player {
                    self.scheduler.schedule_evaluation();
                }
            }

            BrowserEvent::TabRemoved { tab_id } => {
                self.registry.forget(tab_id);
                if self.active_tab == Some(tab_id) {
                    self.active_tab = None;
                }
                // The retry was for a treatment the closed tab may have
                // decided; the next evaluation re-arms it if still needed.
                self.scheduler.clear_retry();
                self.scheduler.schedule_evaluation();
            }

            BrowserEvent::WindowFocusChanged => self.scheduler.schedule_evaluation(),

            BrowserEvent::RuntimeMessage {
                tab_id,
                tab_url,
                message,
            } => {
                let Some(tab_id) = tab_id else {
                    debug!("Coordinator: ignoring runtime message without a sender tab");
                    return;
                };
                match message {
                    TabEvent::PushState {
                        source,
                        is_playing,
                        on_target_page,
                        url,
                    } => {
                        let snapshot = PlaybackSnapshot {
                            is_playing,
                            on_target_page,
                            url: url.or(tab_url).unwrap_or_default(),
                        };
                        debug!("Coordinator: tab {} pushed {} {:?}", tab_id, source, snapshot);
                        self.registry.record_push(tab_id, source, snapshot);
                    }
                }
                self.scheduler.schedule_evaluation();
            }

            BrowserEvent::ModeChanged { value } => {
                let Some(mode) = value.as_deref().and_then(Mode::parse) else {
                    debug!("Coordinator: ignoring unknown mode value {:?}", value);
                    return;
                };
                if let Err(e) = self.mode_store.save(mode) {
                    warn!("Coordinator: failed to persist mode {}: {}", mode, e);
                }
                self.apply_mode(mode).await;
            }
        }
    }

    /// Injects scripts into open tabs, loads the mode and schedules a first
    /// evaluation.
    async fn startup(&mut self) {
        self.dispatcher.inject_existing_tabs().await;

        let mode = match self.dispatcher.read_mode().await {
            Ok(Some(value)) => {
                let mode = Mode::from_stored(Some(&value));
                if let Err(e) = self.mode_store.save(mode) {
                    warn!("Coordinator: failed to persist mode {}: {}", mode, e);
                }
                mode
            }
            Ok(None) => self.mode_store.load(),
            Err(e) => {
                debug!("Coordinator: browser mode unavailable ({}), using stored mode", e);
                self.mode_store.load()
            }
        };
        self.apply_mode(mode).await;
        self.scheduler.schedule_evaluation();
    }

    // ── mode ──────────────────────────────────────────────────────────────────

    async fn apply_mode(&mut self, next: Mode) {
        if next == self.mode {
            return;
        }
        info!("Coordinator: mode {} -> {}", self.mode, next);
        self.mode = next;
        self.last_pause_state = None;
        self.scheduler.clear_retry();

        match next {
            Mode::Pause => {
                // Leave the player at full volume before pausing takes over.
                let full = self.volume.full;
                match self.dispatcher.broadcast(Command::SetVolume(full)).await {
                    Ok(outcome) if outcome.settled() => self.last_broadcast_volume = Some(full),
                    Ok(_) => {
                        self.last_broadcast_volume = None;
                        self.scheduler.schedule_retry();
                    }
                    Err(e) => {
                        warn!("Coordinator: full-volume broadcast failed: {}", e);
                        self.last_broadcast_volume = None;
                        self.scheduler.schedule_retry();
                    }
                }
            }
            Mode::Duck => {
                // Undo a pause we may have caused; the actuator ignores this
                // if it did not pause the player itself.
                if let Err(e) = self
                    .dispatcher
                    .broadcast(Command::SetPlayback(PlaybackIntent::Resume))
                    .await
                {
                    warn!("Coordinator: resume broadcast failed: {}", e);
                }
            }
        }
        self.scheduler.schedule_evaluation();
    }

    // ── evaluation ────────────────────────────────────────────────────────────

    async fn evaluate(&mut self) {
        if let Err(e) = self.evaluate_and_apply().await {
            error!("Coordinator: evaluation failed: {:#}", e);
            self.scheduler.schedule_retry();
        }
    }

    async fn evaluate_and_apply(&mut self) -> anyhow::Result<()> {
        let policy = match self.mode {
            Mode::Duck => self.policy.duck,
            Mode::Pause => self.policy.pause,
        };

        if self.mode == Mode::Pause {
            let full = self.volume.full;
            self.desired_volume = full;
            if self.last_broadcast_volume != Some(full) {
                let outcome = self.dispatcher.broadcast(Command::SetVolume(full)).await?;
                if outcome.settled() {
                    self.last_broadcast_volume = Some(full);
                } else {
                    self.scheduler.schedule_retry();
                }
            }
        }

        let playing = self.video_is_playing(policy).await?;
        match policy::treatment_for(self.mode, playing, &self.volume) {
            Treatment::Volume(target) => {
                self.desired_volume = target;
                if self.last_broadcast_volume == Some(target) {
                    self.scheduler.clear_retry();
                    return Ok(());
                }

                info!("Coordinator: setting player volume to {}", target);
                let outcome = self.dispatcher.broadcast(Command::SetVolume(target)).await?;
                if outcome.settled() {
                    self.last_broadcast_volume = Some(target);
                    self.scheduler.clear_retry();
                } else {
                    self.scheduler.schedule_retry();
                }
            }

            Treatment::Playback { pause } => {
                if self.last_pause_state == Some(pause) {
                    if self.last_broadcast_volume == Some(self.volume.full) {
                        self.scheduler.clear_retry();
                    }
                    return Ok(());
                }

                let intent = if pause {
                    PlaybackIntent::Pause
                } else {
                    PlaybackIntent::Resume
                };
                info!("Coordinator: {:?} player", intent);
                let outcome = self
                    .dispatcher
                    .broadcast(Command::SetPlayback(intent))
                    .await?;
                if outcome.settled() {
                    self.last_pause_state = Some(pause);
                    if self.last_broadcast_volume == Some(self.volume.full) {
                        self.scheduler.clear_retry();
                    }
                } else {
                    self.scheduler.schedule_retry();
                }
            }
        }
        Ok(())
    }

    async fn video_is_playing(&mut self, policy: ArbitrationPolicy) -> anyhow::Result<bool> {
        match policy {
            ArbitrationPolicy::AnyTab => {
                if policy::any_tab_playing(self.registry.states(), &self.sites) {
                    return Ok(true);
                }
                self.refresh_tracked_tabs().await?;
                Ok(policy::any_tab_playing(self.registry.states(), &self.sites))
            }

            ArbitrationPolicy::ActiveTab => {
                let active = self.dispatcher.active_tab().await?;
                self.active_tab = active.as_ref().map(|tab| tab.id);
                let Some(tab) = active else {
                    return Ok(false);
                };
                let Some(kind) = self.sites.kind_for_url(&tab.url) else {
                    return Ok(false);
                };
                let cached = self.registry.get(tab.id, kind).cloned();
                let state = match cached {
                    Some(state) => Some(state),
                    None => self.registry.record_pull(tab.id, kind, &self.dispatcher).await,
                };
                Ok(policy::active_tab_playing(&tab.url, state.as_ref(), &self.sites))
            }
        }
    }

    /// Pulls the state of every open tracked tab.
    async fn refresh_tracked_tabs(&mut self) -> anyhow::Result<()> {
        let mut targets = Vec::new();
        for kind in SourceKind::ALL {
            for tab in self.dispatcher.tracked_tabs(kind).await? {
                targets.push((tab.id, kind));
            }
        }

        let dispatcher = &self.dispatcher;
        let pulled = join_all(
            targets
                .iter()
                .map(|(tab_id, kind)| dispatcher.request_state(*tab_id, *kind)),
        )
        .await;
        for ((tab_id, kind), snapshot) in targets.into_iter().zip(pulled) {
            self.registry.apply_pull(tab_id, kind, snapshot);
        }
        Ok(())
    }

    /// A player tab finished loading: bring it to the current desired volume
    /// without waiting for the next evaluation.
    async fn send_desired_volume(&mut self, tab_id: TabId) {
        let volume = self.desired_volume;
        debug!("Coordinator: player tab {} loaded, sending volume {}", tab_id, volume);
        if self
            .dispatcher
            .deliver(tab_id, Command::SetVolume(volume))
            .await
        {
            self.last_broadcast_volume = Some(volume);
            self.scheduler.clear_retry();
        } else {
            self.scheduler.schedule_retry();
        }
    }
}
