//! In-tab side of the ducking system.
//!
//! [`Actuator`] runs inside the audio-player tab and turns `SetVolume` /
//! `PauseSource` / `ResumeSource` requests into smooth volume ramps and
//! playback toggles.  [`Reporter`] runs inside tracked video tabs and pushes
//! playback-state changes to the coordinator.  Both only see the page through
//! the capability traits in [`surface`].

pub mod actuator;
pub mod error;
pub mod handle;
pub mod playback;
pub mod ramp;
pub mod reporter;
pub mod single_flight;
pub mod surface;

pub use actuator::{Actuator, SurfaceSignal};
pub use error::ActuatorError;
pub use handle::{Envelope, TabHandle};
pub use reporter::{Reporter, ReporterSignal};
