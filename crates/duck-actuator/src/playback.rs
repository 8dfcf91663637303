//! Pause/resume intent tracking for the player tab.
//!
//! ```text
//!  Idle ──PauseSource──▶ PendingPause ──attempt ok──▶ Idle (paused_by_actuator)
//!  Idle ──ResumeSource─▶ PendingResume ─attempt ok──▶ Idle
//! ```
//!
//! A failed attempt leaves the state pending; the owner retries until it
//! succeeds or a newer intent replaces it.  Resume is only ever attempted
//! when this machine caused the pause, so a track the user paused stays
//! paused.

use tracing::debug;

use crate::surface::{AudioElement, AudioSurface, PlaybackControl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackIntent {
    Pause,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    PendingPause,
    PendingResume,
}

#[derive(Debug)]
pub struct PlaybackMachine {
    state: PlaybackState,
    paused_by_actuator: bool,
}

impl Default for PlaybackMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackMachine {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Idle,
            paused_by_actuator: false,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn paused_by_actuator(&self) -> bool {
        self.paused_by_actuator
    }

    pub fn is_pending(&self) -> bool {
        self.state != PlaybackState::Idle
    }

    /// Registers a new intent, replacing any pending one.  Returns `false`
    /// when there is nothing to do: a resume for a pause we did not cause.
    pub fn request(&mut self, intent: PlaybackIntent) -> bool {
        match intent {
            PlaybackIntent::Pause => {
                self.state = PlaybackState::PendingPause;
                true
            }
            PlaybackIntent::Resume if !self.paused_by_actuator => {
                self.state = PlaybackState::Idle;
                false
            }
            PlaybackIntent::Resume => {
                self.state = PlaybackState::PendingResume;
                true
            }
        }
    }

    /// Tries to reach the pending state.  `true` once nothing is pending.
    pub fn attempt(&mut self, surface: &dyn AudioSurface) -> bool {
        let pause = match self.state {
            PlaybackState::Idle => return true,
            PlaybackState::PendingPause => true,
            PlaybackState::PendingResume => false,
        };

        let element_result = surface
            .find_primary_audio_element()
            .and_then(|element| drive_element(element.as_ref(), pause));
        let result = element_result.or_else(|| {
            surface
                .find_playback_control()
                .and_then(|control| drive_control(control.as_ref(), pause))
        });

        let Some(acted) = result else {
            return false;
        };

        if pause {
            if acted {
                self.paused_by_actuator = true;
            }
        } else {
            self.paused_by_actuator = false;
        }
        self.state = PlaybackState::Idle;
        true
    }
}

/// `Some(acted)` when the element ends up in the wanted state, `None` when it
/// could not be moved there.
fn drive_element(element: &dyn AudioElement, pause: bool) -> Option<bool> {
    if element.is_paused() == pause {
        return Some(false);
    }
    let result = if pause { element.pause() } else { element.play() };
    match result {
        Ok(()) if element.is_paused() == pause => Some(true),
        Ok(()) => {
            debug!("Playback: element ignored {}", if pause { "pause" } else { "play" });
            None
        }
        Err(e) => {
            debug!("Playback: element refused: {}", e);
            None
        }
    }
}

fn drive_control(control: &dyn PlaybackControl, pause: bool) -> Option<bool> {
    match control.is_playing() {
        Some(playing) if playing != pause => Some(false),
        Some(_) => match control.click() {
            Ok(()) => Some(true),
            Err(e) => {
                debug!("Playback: play/pause button failed: {}", e);
                None
            }
        },
        None => None,
    }
}
