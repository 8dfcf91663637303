use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("insufficient data for length header")]
    ShortHeader,

    #[error("insufficient data for frame: need {needed} bytes, have {available}")]
    ShortFrame { needed: usize, available: usize },

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },
}
