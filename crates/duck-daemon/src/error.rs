use thiserror::Error;

/// Why a message to a tab (or a bridge operation) did not produce a reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The tab exists but nothing in it is listening.
    #[error("receiving end does not exist")]
    NoReceiver,

    #[error("tab is gone")]
    TabClosed,

    #[error("bridge error: {0}")]
    Bridge(String),

    #[error("bridge is not connected")]
    Disconnected,

    #[error("script injection failed: {0}")]
    Injection(String),
}

impl SendError {
    /// Classifies a browser error message.
    pub fn from_browser_message(message: &str) -> Self {
        if is_missing_receiver(message) {
            SendError::NoReceiver
        } else if message.starts_with("No tab with id") {
            SendError::TabClosed
        } else {
            SendError::Bridge(message.to_string())
        }
    }
}

/// The messages browsers use when a tab has no live listener.
pub fn is_missing_receiver(message: &str) -> bool {
    message.contains("Receiving end does not exist")
        || message.contains("Could not establish connection")
}
