//! WebSocket listener and per-connection frame pump
//!
//! One task per worker socket. The task registers the worker once the
//! handshake succeeds and unregisters it when the socket ends, whichever
//! side closed it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_async_with_config, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::registry::{ConnectionPeer, ConnectionRegistry, WorkerConnection};

/// Upper bound on a graceful close, from sending the close frame to the
/// worker's acknowledgement
pub const CLOSE_LINGER: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────
// Gateway
// ─────────────────────────────────────────────────────────────────

/// Bound WebSocket listener feeding the connection registry
pub struct Gateway {
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    queue_size: usize,
}

impl Gateway {
    /// Bind the listener; workers are not accepted until [`Gateway::run`]
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<ConnectionRegistry>,
        queue_size: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| Error::Bind {
            addr: addr.to_string(),
            source: e,
        })?;
        let local_addr = listener.local_addr()?;

        debug!(addr = %local_addr, "Worker listener bound");

        Ok(Self {
            listener,
            local_addr,
            registry,
            queue_size,
        })
    }

    /// Address the listener is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the accept loop on a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Accept worker connections forever
    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, remote)) => {
                    debug!(remote = %remote, "Incoming worker connection");

                    let registry = Arc::clone(&self.registry);
                    let queue_size = self.queue_size;
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, remote, registry, queue_size).await {
                            debug!(remote = %remote, error = %e, "Worker connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Connection Handling
// ─────────────────────────────────────────────────────────────────

/// Complete the handshake, then pump frames until either side closes
async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    queue_size: usize,
) -> Result<()> {
    // Parameter sets can be large; no frame or message size cap
    let ws_config = WebSocketConfig {
        max_message_size: None,
        max_frame_size: None,
        ..Default::default()
    };
    let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;

    let (connection, mut peer) = WorkerConnection::channel(Some(remote), queue_size);
    let id = connection.id();
    registry.add(connection);
    info!(connection = %id, remote = %remote, workers = registry.len(), "Worker connected");

    let result = pump(ws_stream, &mut peer).await;

    // Unregister before the coordinator can observe the closed channel
    registry.remove(id);
    drop(peer);
    match &result {
        Ok(()) => info!(connection = %id, workers = registry.len(), "Worker disconnected"),
        Err(e) => warn!(
            connection = %id,
            workers = registry.len(),
            error = %e,
            "Worker connection lost"
        ),
    }

    result
}

/// Move frames between the socket and the coordinator-side queues
async fn pump(ws_stream: WebSocketStream<TcpStream>, peer: &mut ConnectionPeer) -> Result<()> {
    let (mut write, mut read) = ws_stream.split();
    let ConnectionPeer {
        outbound,
        close,
        inbound,
    } = peer;

    let reason = loop {
        tokio::select! {
            frame = read.next() => {
                let payload = match frame {
                    Some(Ok(WsMessage::Text(text))) => text.into_bytes(),
                    Some(Ok(WsMessage::Binary(data))) => data,
                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(frame = ?frame, "Received close frame");
                        return Ok(());
                    }
                    // tungstenite answers pings itself
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                };

                match inbound.try_send(payload) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!("Inbound queue full, dropping worker frame");
                    }
                    Err(TrySendError::Closed(_)) => return Ok(()),
                }
            }

            text = outbound.recv() => {
                let Some(text) = text else {
                    return Ok(());
                };
                // Stalls while the worker is not reading; a close request still gets through
                tokio::select! {
                    sent = write.send(WsMessage::Text(text)) => sent?,
                    reason = close.requested() => break reason,
                }
            }

            reason = close.requested() => break reason,
        }
    };

    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: reason.into(),
    };
    let handshake = tokio::time::timeout(CLOSE_LINGER, async {
        write.send(WsMessage::Close(Some(frame))).await?;
        // Drain until the worker echoes the close or goes away
        while let Some(Ok(_)) = read.next().await {}
        Ok::<(), Error>(())
    })
    .await;

    match handshake {
        Ok(result) => result,
        Err(_) => {
            debug!("Close handshake timed out, dropping socket");
            Ok(())
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
