//! Capabilities the in-tab handlers need from the page.
//!
//! The page glue implements these over the real DOM (shadow roots included);
//! tests implement them over plain structs.  Every lookup returns a fresh
//! handle so callers can notice when the page swapped elements underneath
//! them.

use std::sync::Arc;

use crate::error::ActuatorError;

/// A media element the player actually plays through.
pub trait AudioElement: Send + Sync {
    fn volume(&self) -> f64;

    /// Writes `volume` directly.  The element may clamp, ignore or throw.
    fn set_volume(&self, volume: f64) -> Result<(), ActuatorError>;

    fn is_paused(&self) -> bool;

    fn pause(&self) -> Result<(), ActuatorError>;

    fn play(&self) -> Result<(), ActuatorError>;

    /// `false` once the element has been detached from the document.
    fn is_connected(&self) -> bool;
}

/// The player's own volume slider.
pub trait VolumeControl: Send + Sync {
    /// Current position normalised to `[0, 1]` over the slider's min/max.
    fn value(&self) -> Option<f64>;

    /// Moves the slider to `value` (normalised) and fires `input`.  With
    /// `commit` it also fires `change`, which the player treats as a user
    /// decision.
    fn set_value(&self, value: f64, commit: bool) -> Result<(), ActuatorError>;
}

/// The player's play/pause button.
pub trait PlaybackControl: Send + Sync {
    /// What the button currently claims, when it can be read.
    fn is_playing(&self) -> Option<bool>;

    fn click(&self) -> Result<(), ActuatorError>;
}

pub trait AudioSurface: Send + Sync {
    /// Best candidate among all audio elements: playing, else progressed,
    /// else one with a source, else the first.
    fn find_primary_audio_element(&self) -> Option<Arc<dyn AudioElement>>;

    fn find_volume_control(&self) -> Option<Arc<dyn VolumeControl>>;

    fn find_playback_control(&self) -> Option<Arc<dyn PlaybackControl>>;
}

/// Video side of a tracked tab.
pub trait VideoSurface: Send + Sync {
    /// Whether the preferred video element is audibly playing right now.
    fn is_playing(&self) -> bool;
}
