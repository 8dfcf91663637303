//! Request/reply access to a running in-tab handler.
//!
//! ```text
//!   TabHandle::request(msg) ──Envelope──▶ Actuator::run / Reporter::run
//!          ▲                                       │
//!          └────────── oneshot TabResponse ◀───────┘
//! ```
//!
//! A handler that drops the envelope without replying behaves like a tab with
//! no listener for that message.

use std::time::Duration;

use duck_proto::protocol::{TabRequest, TabResponse};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::ActuatorError;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Envelope {
    /// Raw message as it arrived from the runtime; validated by the handler.
    pub message: Value,
    pub reply: oneshot::Sender<TabResponse>,
}

#[derive(Clone)]
pub struct TabHandle {
    tx: mpsc::Sender<Envelope>,
}

impl TabHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn request(&self, message: Value) -> Result<TabResponse, ActuatorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope {
                message,
                reply: reply_tx,
            })
            .await
            .map_err(|_| ActuatorError::Stopped)?;

        tokio::time::timeout(REQUEST_TIMEOUT, reply_rx)
            .await
            .map_err(|_| ActuatorError::Timeout)?
            .map_err(|_| ActuatorError::NoResponse)
    }

    pub async fn send(&self, request: &TabRequest) -> Result<TabResponse, ActuatorError> {
        self.request(serde_json::to_value(request)?).await
    }
}
