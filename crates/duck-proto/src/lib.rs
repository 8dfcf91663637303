//! Shared types for the duck coordinator, the browser bridge and the in-tab
//! actuators: wire protocol, site matching, the mode preference and config.

pub mod config;
pub mod error;
pub mod mode;
pub mod platform;
pub mod protocol;
pub mod sites;

pub use error::ProtoError;
