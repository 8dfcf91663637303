//! Volume and playback actuator for the audio-player tab.
//!
//! `Actuator::run` owns all per-tab state.  Requests arrive as
//! [`Envelope`]s; page signals (element events and DOM mutations) on a
//! separate channel.  Volume changes are ramped towards the desired level
//! instead of jumping, and playback intents are retried until they stick.

use std::sync::Arc;

use duck_proto::config::RampConfig;
use duck_proto::protocol::TabResponse;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::error::ActuatorError;
use crate::handle::Envelope;
use crate::playback::{PlaybackIntent, PlaybackMachine};
use crate::ramp::{self, RampParams, RampStep};
use crate::single_flight::SingleFlight;
use crate::surface::{AudioElement, AudioSurface};

/// Tolerance when checking that a direct element write took effect.
const ELEMENT_WRITE_EPSILON: f64 = 0.02;

/// Page happenings that may invalidate the bound audio element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceSignal {
    /// `play` on the bound element.
    Play,
    /// `loadedmetadata` on the bound element.
    LoadedMetadata,
    /// `emptied` on the bound element.
    Emptied,
    /// Child-list mutation somewhere in the document.
    Mutation,
}

#[derive(Debug)]
struct Ramp {
    position: f64,
    target: f64,
    last_tick: Instant,
    next_tick: Instant,
}

pub struct Actuator {
    surface: Arc<dyn AudioSurface>,
    config: RampConfig,
    params: RampParams,
    desired_volume: Option<f64>,
    bound: Option<Arc<dyn AudioElement>>,
    /// Set once a direct element write fails to stick; the slider then
    /// carries the real level.
    level_on_slider: bool,
    ramp: Option<Ramp>,
    playback: PlaybackMachine,
    playback_retry_at: Option<Instant>,
    resolve: SingleFlight,
}

impl Actuator {
    pub fn new(surface: Arc<dyn AudioSurface>, config: &RampConfig) -> Self {
        Self {
            surface,
            config: config.clone(),
            params: RampParams::from(config),
            desired_volume: None,
            bound: None,
            level_on_slider: false,
            ramp: None,
            playback: PlaybackMachine::new(),
            playback_retry_at: None,
            resolve: SingleFlight::new(),
        }
    }

    pub fn desired_volume(&self) -> Option<f64> {
        self.desired_volume
    }

    pub fn is_ramping(&self) -> bool {
        self.ramp.is_some()
    }

    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<Envelope>,
        mut signals: mpsc::Receiver<SurfaceSignal>,
    ) {
        info!("Actuator: running");
        let mut signals_open = true;

        loop {
            let ramp_at = self.ramp.as_ref().map(|r| r.next_tick);
            let retry_at = self.playback_retry_at;

            tokio::select! {
                biased;

                envelope = requests.recv() => {
                    let Some(envelope) = envelope else {
                        break;
                    };
                    let response = self.handle_raw(&envelope.message);
                    if envelope.reply.send(response).is_err() {
                        debug!("Actuator: requester went away before the reply");
                    }
                }

                signal = signals.recv(), if signals_open => match signal {
                    Some(signal) => self.on_signal(signal),
                    None => signals_open = false,
                },

                _ = sleep_until(ramp_at.unwrap_or_else(Instant::now)), if ramp_at.is_some() => {
                    self.ramp_tick();
                }

                _ = sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                    self.retry_playback();
                }

                // Runs once the signal queue is drained.
                _ = std::future::ready(()), if self.resolve.is_scheduled() => {
                    self.resolve.take();
                    self.resolve_and_apply(false);
                }
            }
        }

        info!("Actuator: request channel closed, stopping");
    }

    /// Validates and applies one raw tab message.
    pub fn handle_raw(&mut self, message: &Value) -> TabResponse {
        match message.get("type").and_then(Value::as_str) {
            Some("SetVolume") => match parse_volume(message.get("value")) {
                Ok(volume) => {
                    self.set_desired_volume(volume);
                    TabResponse::ack(true)
                }
                Err(e) => {
                    warn!("Actuator: rejected SetVolume: {}", e);
                    TabResponse::ack(false)
                }
            },
            Some("PauseSource") => TabResponse::ack(self.request_playback(PlaybackIntent::Pause)),
            Some("ResumeSource") => TabResponse::ack(self.request_playback(PlaybackIntent::Resume)),
            other => {
                debug!("Actuator: ignoring message type {:?}", other);
                TabResponse::ack(false)
            }
        }
    }

    // ── volume ────────────────────────────────────────────────────────────────

    pub fn set_desired_volume(&mut self, volume: f64) {
        debug!("Actuator: desired volume {:.2}", volume);
        self.desired_volume = Some(volume);
        if let Some(ramp) = self.ramp.as_mut() {
            ramp.target = volume;
            return;
        }
        self.resolve_and_apply(true);
    }

    /// Re-binds the primary audio element and brings it to the desired
    /// volume.  Without `force` nothing is written when the element is
    /// unchanged and already close to the target.
    fn resolve_and_apply(&mut self, force: bool) {
        let element = self.surface.find_primary_audio_element();
        let changed = match (&self.bound, &element) {
            (Some(current), Some(found)) => !Arc::ptr_eq(current, found),
            (None, None) => false,
            _ => true,
        };
        if changed {
            debug!("Actuator: audio element rebound (present={})", element.is_some());
            self.bound = element;
        }

        let Some(target) = self.desired_volume else {
            return;
        };
        if let Some(ramp) = self.ramp.as_mut() {
            ramp.target = target;
            return;
        }
        if !force && !changed {
            if let Some(level) = self.current_level() {
                if (level - target).abs() <= self.params.epsilon {
                    return;
                }
            }
        }
        self.start_ramp(target);
    }

    fn start_ramp(&mut self, target: f64) {
        let Some(start) = self.current_level() else {
            debug!(
                "Actuator: no audio element or volume control yet, {:.2} deferred",
                target
            );
            return;
        };

        if (start - target).abs() <= self.params.epsilon {
            self.commit_final(target);
            return;
        }

        let now = Instant::now();
        debug!("Actuator: ramp {:.2} -> {:.2}", start, target);
        self.ramp = Some(Ramp {
            position: start,
            target,
            last_tick: now,
            next_tick: now + self.config.tick(),
        });
    }

    fn ramp_tick(&mut self) {
        let Some(mut ramp) = self.ramp.take() else {
            return;
        };

        let now = Instant::now();
        let elapsed = now.saturating_duration_since(ramp.last_tick);
        match ramp::step(ramp.position, ramp.target, elapsed, &self.params) {
            RampStep::Continue(next) => {
                if !self.write_level(next) {
                    warn!("Actuator: audio element and volume control gone, ramp aborted");
                    return;
                }
                ramp.position = next;
                ramp.last_tick = now;
                ramp.next_tick = now + self.config.tick();
                self.ramp = Some(ramp);
            }
            RampStep::Finish(target) => self.commit_final(target),
        }
    }

    /// Intermediate ramp write: direct element first, slider only when the
    /// element is missing or the write did not stick.  Returns `false` when
    /// neither exists.
    fn write_level(&mut self, level: f64) -> bool {
        let mut found = false;
        if let Some(element) = self.live_element() {
            found = true;
            match element.set_volume(level) {
                Ok(()) if (element.volume() - level).abs() <= ELEMENT_WRITE_EPSILON => {
                    self.level_on_slider = false;
                    return true;
                }
                Ok(()) => debug!("Actuator: element volume did not stick at {:.2}", level),
                Err(e) => debug!("Actuator: {}", e),
            }
        }

        if let Some(control) = self.surface.find_volume_control() {
            found = true;
            self.level_on_slider = true;
            if let Err(e) = control.set_value(level, false) {
                debug!("Actuator: volume slider write failed: {}", e);
            }
        }
        found
    }

    /// Final ramp write: element and slider, with the slider's change event.
    fn commit_final(&mut self, target: f64) {
        let element = self.live_element();
        let control = self.surface.find_volume_control();
        if element.is_none() && control.is_none() {
            warn!("Actuator: nothing to commit {:.2} to, ramp aborted", target);
            return;
        }

        if let Some(element) = element {
            match element.set_volume(target) {
                Ok(()) if (element.volume() - target).abs() <= ELEMENT_WRITE_EPSILON => {
                    self.level_on_slider = false;
                }
                Ok(()) => self.level_on_slider = control.is_some(),
                Err(e) => warn!("Actuator: {}", e),
            }
        }
        if let Some(control) = control {
            if let Err(e) = control.set_value(target, true) {
                warn!("Actuator: volume slider commit failed: {}", e);
            }
        }
        info!("Actuator: volume settled at {:.2}", target);
    }

    /// Bound element if still attached, otherwise whatever the page offers now.
    fn live_element(&mut self) -> Option<Arc<dyn AudioElement>> {
        if let Some(element) = &self.bound {
            if element.is_connected() {
                return Some(element.clone());
            }
        }
        self.bound = self.surface.find_primary_audio_element();
        self.bound.clone()
    }

    /// Level the listener actually hears: the slider's once element writes
    /// have stopped sticking, the element's otherwise.
    fn current_level(&mut self) -> Option<f64> {
        if self.level_on_slider {
            if let Some(level) = self.surface.find_volume_control().and_then(|c| c.value()) {
                return Some(level);
            }
        }
        if let Some(element) = self.live_element() {
            return Some(element.volume());
        }
        self.surface.find_volume_control().and_then(|c| c.value())
    }

    fn on_signal(&mut self, signal: SurfaceSignal) {
        if signal == SurfaceSignal::Mutation
            && self.bound.as_ref().is_some_and(|el| el.is_connected())
        {
            return;
        }
        self.resolve.schedule();
    }

    // ── playback ──────────────────────────────────────────────────────────────

    fn request_playback(&mut self, intent: PlaybackIntent) -> bool {
        if !self.playback.request(intent) {
            debug!("Actuator: resume skipped, playback was not paused by us");
            self.playback_retry_at = None;
            return true;
        }

        if self.playback.attempt(self.surface.as_ref()) {
            info!("Actuator: {:?} applied", intent);
            self.playback_retry_at = None;
            return true;
        }

        warn!(
            "Actuator: {:?} not applied, retrying every {:?}",
            intent,
            self.config.playback_retry()
        );
        self.playback_retry_at = Some(Instant::now() + self.config.playback_retry());
        false
    }

    fn retry_playback(&mut self) {
        self.playback_retry_at = None;
        if self.playback.attempt(self.surface.as_ref()) {
            info!("Actuator: pending {:?} applied on retry", self.playback.state());
            return;
        }
        self.playback_retry_at = Some(Instant::now() + self.config.playback_retry());
    }
}

/// Accepts JSON numbers and numeric strings in `[0, 1]`.
pub fn parse_volume(value: Option<&Value>) -> Result<f64, ActuatorError> {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    let describe = || value.map(Value::to_string).unwrap_or_else(|| "missing".into());
    match parsed {
        Some(v) if v.is_finite() && (0.0..=1.0).contains(&v) => Ok(v),
        _ => Err(ActuatorError::InvalidVolume(describe())),
    }
}
