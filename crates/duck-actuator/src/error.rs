use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("invalid volume value: {0}")]
    InvalidVolume(String),

    #[error("audio element rejected the write: {0}")]
    ElementWrite(String),

    #[error("playback control failed: {0}")]
    Control(String),

    #[error("in-tab handler has stopped")]
    Stopped,

    #[error("in-tab handler dropped the request without answering")]
    NoResponse,

    #[error("in-tab handler did not answer in time")]
    Timeout,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
