//! The duck coordinator: tracks video playback across browser tabs and keeps
//! the player tab's volume (or play/pause state) in line with it.

pub mod bridge;
pub mod browser;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod policy;
pub mod registry;
pub mod scheduler;
pub mod socket;

pub use crate::core::{CoordinatorCore, CoordinatorEvent};
pub use browser::Browser;
pub use error::SendError;
