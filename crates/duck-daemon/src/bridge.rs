//! `Browser` implementation backed by a connected bridge.
//!
//! ```text
//!   BridgeBrowser::serve(stream)
//!         │
//!         ├── writer_task   ← PendingRequest via mpsc, registers reply → socket
//!         ├── reader loop   ← length-prefixed frames from socket
//!         │                      ├── Reply (request_id) → matched oneshot::Sender
//!         │                      └── Event              → unbounded relay
//!         └── relay_events  ← relay → CoordinatorEvent channel
//! ```
//!
//! Only one bridge is served at a time; a newer connection replaces the
//! handle used for requests.  With no bridge attached every operation fails
//! with `SendError::Disconnected`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use duck_proto::protocol::{
    BridgeOp, BridgeResult, BrowserEvent, Frame, TabId, TabInfo, TabRequest, TabScript,
    PROTOCOL_VERSION,
};
use duck_proto::ProtoError;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::browser::Browser;
use crate::core::CoordinatorEvent;
use crate::error::SendError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// ── global request-id counter ─────────────────────────────────────────────────

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

// ── internal channel types ────────────────────────────────────────────────────

type ReplySender = oneshot::Sender<Result<BridgeResult, SendError>>;
type PendingMap = Arc<Mutex<HashMap<u64, ReplySender>>>;

struct PendingRequest {
    request_id: u64,
    frame: Vec<u8>,
    reply: ReplySender,
}

// ── handle ────────────────────────────────────────────────────────────────────

/// Cloneable handle to one connection's writer task.
#[derive(Clone)]
struct BridgeHandle {
    connection_id: u64,
    tx: mpsc::Sender<PendingRequest>,
}

impl BridgeHandle {
    async fn request(&self, op: BridgeOp, timeout: Duration) -> Result<BridgeResult, SendError> {
        let request_id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::Request { request_id, op }
            .encode()
            .map_err(|e| SendError::Bridge(e.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                request_id,
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SendError::Disconnected)?;

        tokio::time::timeout(timeout, reply_rx)
            .await
            .map_err(|_| SendError::Bridge(format!("timeout for req={}", request_id)))?
            .map_err(|_| SendError::Disconnected)?
    }
}

// ── BridgeBrowser ─────────────────────────────────────────────────────────────

pub struct BridgeBrowser {
    current: RwLock<Option<BridgeHandle>>,
    timeout: Duration,
}

impl Default for BridgeBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeBrowser {
    pub fn new() -> Self {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            current: RwLock::new(None),
            timeout,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.current.read().await.is_some()
    }

    async fn request(&self, op: BridgeOp) -> Result<BridgeResult, SendError> {
        let handle = self
            .current
            .read()
            .await
            .clone()
            .ok_or(SendError::Disconnected)?;
        handle.request(op, self.timeout).await
    }

    /// Serves one bridge connection until it closes.  Events are forwarded
    /// to the coordinator; replies resolve pending requests.  The coordinator
    /// is told once the connection is usable and again when it is gone,
    /// unless a newer bridge has taken over by then.
    pub async fn serve<S>(
        &self,
        stream: S,
        connection_id: u64,
        event_tx: mpsc::Sender<CoordinatorEvent>,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);

        let writer = tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));

        {
            let mut current = self.current.write().await;
            if current.is_some() {
                warn!("Bridge {}: replacing previously connected bridge", connection_id);
            }
            *current = Some(BridgeHandle {
                connection_id,
                tx: cmd_tx,
            });
        }

        let _ = event_tx.send(CoordinatorEvent::BridgeConnected).await;

        // The coordinator awaits replies inline, so the reader must never
        // block on the coordinator's queue.
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let relay = tokio::spawn(relay_events(relay_rx, event_tx.clone(), connection_id));

        reader_loop(read_half, connection_id, &pending, &relay_tx).await;
        drop(relay_tx);

        let detached = {
            let mut current = self.current.write().await;
            if current.as_ref().map(|h| h.connection_id) == Some(connection_id) {
                *current = None;
                true
            } else {
                false
            }
        };
        writer.abort();

        {
            let mut map = pending.lock().await;
            for (_, tx) in map.drain() {
                let _ = tx.send(Err(SendError::Disconnected));
            }
        }

        // Events read before the close are delivered first.
        let _ = relay.await;
        if detached {
            let _ = event_tx.send(CoordinatorEvent::BridgeDisconnected).await;
        }
    }
}

fn unexpected(result: BridgeResult) -> SendError {
    SendError::Bridge(format!("unexpected reply: {:?}", result))
}

#[async_trait]
impl Browser for BridgeBrowser {
    async fn query_tabs(&self, patterns: &[String]) -> Result<Vec<TabInfo>, SendError> {
        match self
            .request(BridgeOp::QueryTabs {
                patterns: patterns.to_vec(),
            })
            .await?
        {
            BridgeResult::Tabs { tabs } => Ok(tabs),
            BridgeResult::Failed { error, .. } => Err(SendError::Bridge(error)),
            other => Err(unexpected(other)),
        }
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>, SendError> {
        match self.request(BridgeOp::ActiveTab).await? {
            BridgeResult::ActiveTab { tab } => Ok(tab),
            BridgeResult::Failed { error, .. } => Err(SendError::Bridge(error)),
            other => Err(unexpected(other)),
        }
    }

    async fn send_to_tab(&self, tab_id: TabId, message: &TabRequest) -> Result<Value, SendError> {
        match self
            .request(BridgeOp::SendToTab {
                tab_id,
                message: message.clone(),
            })
            .await?
        {
            BridgeResult::TabReply { reply } => Ok(reply),
            BridgeResult::Failed {
                no_receiver: true, ..
            } => Err(SendError::NoReceiver),
            BridgeResult::Failed { error, .. } => Err(SendError::from_browser_message(&error)),
            other => Err(unexpected(other)),
        }
    }

    async fn inject(&self, tab_id: TabId, script: TabScript) -> Result<(), SendError> {
        match self.request(BridgeOp::Inject { tab_id, script }).await? {
            BridgeResult::Injected => Ok(()),
            BridgeResult::Failed { error, .. } => Err(SendError::Injection(error)),
            other => Err(unexpected(other)),
        }
    }

    async fn read_mode(&self) -> Result<Option<String>, SendError> {
        match self.request(BridgeOp::ReadMode).await? {
            BridgeResult::Mode { value } => Ok(value),
            BridgeResult::Failed { error, .. } => Err(SendError::Bridge(error)),
            other => Err(unexpected(other)),
        }
    }
}

// ── IO ────────────────────────────────────────────────────────────────────────

async fn reader_loop<R>(
    mut reader: R,
    connection_id: u64,
    pending: &PendingMap,
    relay: &mpsc::UnboundedSender<BrowserEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    loop {
        match reader.read(&mut tmp).await {
            Ok(0) => {
                info!("Bridge {}: connection closed", connection_id);
                return;
            }
            Ok(n) => {
                read_buf.extend_from_slice(&tmp[..n]);
                loop {
                    match Frame::decode(&read_buf) {
                        Ok((frame, consumed)) => {
                            read_buf.drain(..consumed);
                            if !route_frame(frame, connection_id, pending, relay).await {
                                return;
                            }
                        }
                        Err(ProtoError::ShortHeader) | Err(ProtoError::ShortFrame { .. }) => break,
                        Err(e) => {
                            warn!("Bridge {}: framing error, dropping connection: {}", connection_id, e);
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Bridge {}: read error: {}", connection_id, e);
                return;
            }
        }
    }
}

/// Returns `false` once the coordinator is gone.
async fn route_frame(
    frame: Frame,
    connection_id: u64,
    pending: &PendingMap,
    relay: &mpsc::UnboundedSender<BrowserEvent>,
) -> bool {
    match frame {
        Frame::Reply { request_id, result } => {
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&request_id) {
                debug!("Bridge {}: reply req={}", connection_id, request_id);
                let _ = tx.send(Ok(result));
            } else {
                debug!("Bridge {}: reply for unknown req={}", connection_id, request_id);
            }
            true
        }
        Frame::Event { event } => {
            debug!("Bridge {}: event {:?}", connection_id, event);
            if relay.send(event).is_err() {
                return false;
            }
            true
        }
        Frame::Hello { protocol_version } => {
            if protocol_version != PROTOCOL_VERSION {
                warn!(
                    "Bridge {}: protocol version {} (daemon speaks {})",
                    connection_id, protocol_version, PROTOCOL_VERSION
                );
            }
            true
        }
        Frame::Request { request_id, .. } => {
            debug!("Bridge {}: ignoring request frame req={}", connection_id, request_id);
            true
        }
    }
}

/// Feeds browser events into the coordinator in arrival order.
async fn relay_events(
    mut rx: mpsc::UnboundedReceiver<BrowserEvent>,
    event_tx: mpsc::Sender<CoordinatorEvent>,
    connection_id: u64,
) {
    while let Some(event) = rx.recv().await {
        if event_tx.send(CoordinatorEvent::Browser(event)).await.is_err() {
            warn!("Bridge {}: coordinator channel closed", connection_id);
            return;
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: AsyncWrite + Unpin,
{
    let hello = Frame::Hello {
        protocol_version: PROTOCOL_VERSION,
    };
    match hello.encode() {
        Ok(bytes) => {
            if let Err(e) = writer.write_all(&bytes).await {
                warn!("Bridge writer: failed to send hello: {}", e);
                return;
            }
        }
        Err(e) => warn!("Bridge writer: failed to encode hello: {}", e),
    }

    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can match the reply
        {
            let mut map = pending.lock().await;
            map.insert(req.request_id, req.reply);
        }
        if let Err(e) = writer.write_all(&req.frame).await {
            warn!("Bridge writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.request_id) {
                let _ = tx.send(Err(SendError::Disconnected));
            }
            break;
        }
    }
    debug!("Bridge writer: task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use duck_proto::protocol::TabEvent;
    use tokio::io::DuplexStream;

    async fn read_frame(stream: &mut DuplexStream) -> Frame {
        let mut header = [0u8; 4];
        stream.read_exact(&mut header).await.unwrap();
        let len = u32::from_be_bytes(header) as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        let mut data = header.to_vec();
        data.extend_from_slice(&body);
        Frame::decode(&data).unwrap().0
    }

    async fn write_frame(stream: &mut DuplexStream, frame: Frame) {
        stream.write_all(&frame.encode().unwrap()).await.unwrap();
    }

    fn serve(
        browser: &Arc<BridgeBrowser>,
    ) -> (DuplexStream, mpsc::Receiver<CoordinatorEvent>, tokio::task::JoinHandle<()>) {
        let (daemon_side, bridge_side) = tokio::io::duplex(64 * 1024);
        let (event_tx, event_rx) = mpsc::channel(16);
        let b = browser.clone();
        let task = tokio::spawn(async move { b.serve(daemon_side, 1, event_tx).await });
        (bridge_side, event_rx, task)
    }

    #[tokio::test]
    async fn test_request_reply_round_trip() {
        let browser = Arc::new(BridgeBrowser::new());
        let (mut bridge, _events, _task) = serve(&browser);

        assert_eq!(
            read_frame(&mut bridge).await,
            Frame::Hello {
                protocol_version: PROTOCOL_VERSION
            }
        );

        let b = browser.clone();
        let query = tokio::spawn(async move { b.query_tabs(&["*://open.spotify.com/*".into()]).await });

        let request_id = match read_frame(&mut bridge).await {
            Frame::Request {
                request_id,
                op: BridgeOp::QueryTabs { patterns },
            } => {
                assert_eq!(patterns, vec!["*://open.spotify.com/*".to_string()]);
                request_id
            }
            other => panic!("unexpected frame: {:?}", other),
        };
        let tab = TabInfo {
            id: 4,
            url: "https://open.spotify.com/".into(),
            active: false,
        };
        write_frame(
            &mut bridge,
            Frame::Reply {
                request_id,
                result: BridgeResult::Tabs {
                    tabs: vec![tab.clone()],
                },
            },
        )
        .await;

        assert_eq!(query.await.unwrap().unwrap(), vec![tab]);
    }

    #[tokio::test]
    async fn test_failed_send_maps_to_no_receiver() {
        let browser = Arc::new(BridgeBrowser::new());
        let (mut bridge, _events, _task) = serve(&browser);
        read_frame(&mut bridge).await;

        let b = browser.clone();
        let send = tokio::spawn(async move { b.send_to_tab(3, &TabRequest::PauseSource).await });
        let Frame::Request { request_id, .. } = read_frame(&mut bridge).await else {
            panic!("expected a request");
        };
        write_frame(
            &mut bridge,
            Frame::Reply {
                request_id,
                result: BridgeResult::Failed {
                    error: "Could not establish connection. Receiving end does not exist.".into(),
                    no_receiver: false,
                },
            },
        )
        .await;

        assert_eq!(send.await.unwrap(), Err(SendError::NoReceiver));
    }

    #[tokio::test]
    async fn test_events_are_forwarded() {
        let browser = Arc::new(BridgeBrowser::new());
        let (mut bridge, mut events, _task) = serve(&browser);
        read_frame(&mut bridge).await;

        let event = BrowserEvent::RuntimeMessage {
            tab_id: Some(2),
            tab_url: None,
            message: TabEvent::PushState {
                source: duck_proto::protocol::SourceKind::YouTube,
                is_playing: true,
                on_target_page: true,
                url: Some("https://www.youtube.com/watch?v=a".into()),
            },
        };
        write_frame(&mut bridge, Frame::Event { event: event.clone() }).await;

        assert!(matches!(
            events.recv().await,
            Some(CoordinatorEvent::BridgeConnected)
        ));
        match events.recv().await {
            Some(CoordinatorEvent::Browser(received)) => assert_eq!(received, event),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_replies_flow_while_coordinator_is_busy() {
        let browser = Arc::new(BridgeBrowser::new());
        let (daemon_side, mut bridge) = tokio::io::duplex(64 * 1024);
        // Room for `BridgeConnected` only, and nothing drains it until the
        // reply is in.
        let (event_tx, mut events) = mpsc::channel(1);
        let b = browser.clone();
        tokio::spawn(async move { b.serve(daemon_side, 1, event_tx).await });
        read_frame(&mut bridge).await;

        let b = browser.clone();
        let mode = tokio::spawn(async move { b.read_mode().await });
        let Frame::Request { request_id, .. } = read_frame(&mut bridge).await else {
            panic!("expected a request");
        };
        for _ in 0..8 {
            write_frame(
                &mut bridge,
                Frame::Event {
                    event: BrowserEvent::WindowFocusChanged,
                },
            )
            .await;
        }
        write_frame(
            &mut bridge,
            Frame::Reply {
                request_id,
                result: BridgeResult::Mode {
                    value: Some("pause".into()),
                },
            },
        )
        .await;

        assert_eq!(mode.await.unwrap(), Ok(Some("pause".to_string())));

        // Nothing dropped, nothing reordered.
        assert!(matches!(
            events.recv().await,
            Some(CoordinatorEvent::BridgeConnected)
        ));
        for _ in 0..8 {
            assert!(matches!(
                events.recv().await,
                Some(CoordinatorEvent::Browser(BrowserEvent::WindowFocusChanged))
            ));
        }
    }

    #[tokio::test]
    async fn test_disconnect_fails_pending_and_detaches() {
        let browser = Arc::new(BridgeBrowser::new());
        let (mut bridge, mut events, task) = serve(&browser);
        read_frame(&mut bridge).await;
        assert!(browser.is_connected().await);

        let b = browser.clone();
        let pending = tokio::spawn(async move { b.read_mode().await });
        read_frame(&mut bridge).await;
        drop(bridge);

        assert_eq!(pending.await.unwrap(), Err(SendError::Disconnected));
        task.await.unwrap();
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(matches!(
            seen.as_slice(),
            [CoordinatorEvent::BridgeConnected, CoordinatorEvent::BridgeDisconnected]
        ));
        assert!(!browser.is_connected().await);
        assert_eq!(browser.active_tab().await, Err(SendError::Disconnected));
    }
}
