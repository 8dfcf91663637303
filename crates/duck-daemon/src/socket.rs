use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::bridge::BridgeBrowser;
use crate::core::CoordinatorEvent;

/// Accepts bridge connections on `addr`.  Each connection is served until it
/// closes.
pub fn start_server(
    addr: String,
    bridge: Arc<BridgeBrowser>,
    event_tx: mpsc::Sender<CoordinatorEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind bridge socket {}: {}", addr, e);
                return;
            }
        };

        info!("Bridge server listening at {}", addr);
        accept_loop(listener, bridge, event_tx).await;
    })
}

pub async fn accept_loop(
    listener: TcpListener,
    bridge: Arc<BridgeBrowser>,
    event_tx: mpsc::Sender<CoordinatorEvent>,
) {
    let mut connection_id = 0u64;

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                connection_id += 1;
                let id = connection_id;
                info!("Bridge {} connected from {}", id, peer);
                if let Err(e) = stream.set_nodelay(true) {
                    error!("Bridge {}: failed to set TCP_NODELAY: {}", id, e);
                }

                let bridge = bridge.clone();
                let evt_tx = event_tx.clone();
                tokio::spawn(async move {
                    bridge.serve(stream, id, evt_tx).await;
                    info!("Bridge {} disconnected", id);
                });
            }
            Err(e) => {
                error!("Failed to accept bridge connection: {}", e);
            }
        }
    }
}
