//! Worker connection handle
//!
//! A [`WorkerConnection`] is the coordinator's view of one worker channel: an
//! outbound queue drained by the transport task and an inbound queue it fills.
//! The transport keeps the matching [`ConnectionPeer`]. When the transport side
//! goes away, sends fail and receives return `None`; neither is fatal.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};

use crate::error::{Error, Result};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a worker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next id; ids increase in allocation order
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Close request delivered alongside the outbound queue
///
/// A worker that stops reading can leave the outbound queue full and the
/// socket write stalled. Close requests travel on this signal instead, so
/// they reach the transport regardless.
pub struct CloseSignal(watch::Receiver<Option<String>>);

impl CloseSignal {
    /// Resolves with the close reason once one has been requested
    ///
    /// Stays pending forever if every handle is dropped without a request;
    /// the outbound queue reports that case.
    pub async fn requested(&mut self) -> String {
        loop {
            let reason = self.0.borrow_and_update().clone();
            if let Some(reason) = reason {
                return reason;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Coordinator-side handle to one worker channel
#[derive(Clone)]
pub struct WorkerConnection {
    id: ConnectionId,
    remote: Option<SocketAddr>,
    outbound: mpsc::Sender<String>,
    close: Arc<watch::Sender<Option<String>>>,
    inbound: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
}

/// Transport-side ends of a worker channel
pub struct ConnectionPeer {
    /// Text frames the coordinator wants delivered to the worker
    pub outbound: mpsc::Receiver<String>,
    pub close: CloseSignal,
    /// Raw frames received from the worker
    pub inbound: mpsc::Sender<Vec<u8>>,
}

impl WorkerConnection {
    /// Create a connected handle/peer pair with bounded queues
    pub fn channel(remote: Option<SocketAddr>, queue_size: usize) -> (Self, ConnectionPeer) {
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_size);
        let (inbound_tx, inbound_rx) = mpsc::channel(queue_size);
        let (close_tx, close_rx) = watch::channel(None);

        let connection = Self {
            id: ConnectionId::next(),
            remote,
            outbound: outbound_tx,
            close: Arc::new(close_tx),
            inbound: Arc::new(Mutex::new(inbound_rx)),
        };
        let peer = ConnectionPeer {
            outbound: outbound_rx,
            close: CloseSignal(close_rx),
            inbound: inbound_tx,
        };

        (connection, peer)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a text frame for the worker without waiting
    ///
    /// A full queue means the worker is not keeping up; the frame is not
    /// delivered and the caller gets [`Error::OutboundQueueFull`].
    pub fn send_text(&self, text: String) -> Result<()> {
        self.outbound.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => Error::OutboundQueueFull {
                connection: self.id.as_u64(),
            },
            TrySendError::Closed(_) => Error::ConnectionClosed {
                connection: self.id.as_u64(),
            },
        })
    }

    /// Ask the transport to close the channel; `false` if it is already gone
    pub fn close(&self, reason: &str) -> bool {
        self.close.send(Some(reason.to_string())).is_ok()
    }

    /// Resolves once the transport has released its end of the channel
    pub async fn closed(&self) {
        self.outbound.closed().await
    }

    /// Next raw frame from the worker, or `None` once the transport is gone
    pub async fn recv(&self) -> Option<Vec<u8>> {
        self.inbound.lock().await.recv().await
    }

    /// Drop frames that arrived before now; returns how many were dropped
    pub async fn discard_pending(&self) -> usize {
        let mut inbound = self.inbound.lock().await;
        let mut dropped = 0;
        while inbound.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

impl fmt::Debug for WorkerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerConnection")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_connection_ids_increase() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert!(b > a);
        assert!(a.to_string().starts_with("conn-"));
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (conn, mut peer) = WorkerConnection::channel(None, 4);

        conn.send_text("hello".to_string()).unwrap();
        assert_eq!(peer.outbound.recv().await, Some("hello".to_string()));

        peer.inbound.send(b"reply".to_vec()).await.unwrap();
        assert_eq!(conn.recv().await, Some(b"reply".to_vec()));
    }

    #[test]
    fn test_recv_waits_for_a_frame() {
        let (conn, peer) = WorkerConnection::channel(None, 4);
        let mut recv = tokio_test::task::spawn(conn.recv());

        tokio_test::assert_pending!(recv.poll());

        peer.inbound.try_send(b"late".to_vec()).unwrap();
        assert!(recv.is_woken());
        tokio_test::assert_ready_eq!(recv.poll(), Some(b"late".to_vec()));
    }

    #[tokio::test]
    async fn test_clones_share_the_channel() {
        let (conn, peer) = WorkerConnection::channel(None, 4);
        let snapshot_copy = conn.clone();

        peer.inbound.send(b"one".to_vec()).await.unwrap();
        assert_eq!(snapshot_copy.recv().await, Some(b"one".to_vec()));
        assert_eq!(snapshot_copy.id(), conn.id());
    }

    #[tokio::test]
    async fn test_dropped_peer_fails_softly() {
        let (conn, peer) = WorkerConnection::channel(None, 4);
        drop(peer);

        assert!(matches!(
            conn.send_text("late".to_string()),
            Err(Error::ConnectionClosed { .. })
        ));
        assert!(!conn.close("training finished"));
        assert_eq!(conn.recv().await, None);
        tokio::time::timeout(Duration::from_secs(1), conn.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_waiting() {
        let (conn, mut peer) = WorkerConnection::channel(None, 1);

        conn.send_text("first".to_string()).unwrap();
        assert!(matches!(
            conn.send_text("second".to_string()),
            Err(Error::OutboundQueueFull { .. })
        ));

        assert_eq!(peer.outbound.recv().await, Some("first".to_string()));
        conn.send_text("third".to_string()).unwrap();
    }

    #[tokio::test]
    async fn test_discard_pending() {
        let (conn, peer) = WorkerConnection::channel(None, 4);
        peer.inbound.send(b"stale-1".to_vec()).await.unwrap();
        peer.inbound.send(b"stale-2".to_vec()).await.unwrap();

        assert_eq!(conn.discard_pending().await, 2);
        assert_eq!(conn.discard_pending().await, 0);

        peer.inbound.send(b"fresh".to_vec()).await.unwrap();
        assert_eq!(conn.recv().await, Some(b"fresh".to_vec()));
    }

    #[tokio::test]
    async fn test_close_request_reaches_transport() {
        let (conn, mut peer) = WorkerConnection::channel(None, 4);

        assert!(conn.close("training finished"));
        assert_eq!(peer.close.requested().await, "training finished");
    }

    #[tokio::test]
    async fn test_close_request_bypasses_full_queue() {
        let (conn, mut peer) = WorkerConnection::channel(None, 1);
        conn.send_text("never read".to_string()).unwrap();

        assert!(conn.close("training finished"));
        let reason = tokio::time::timeout(Duration::from_secs(1), peer.close.requested())
            .await
            .unwrap();
        assert_eq!(reason, "training finished");
    }

    #[test]
    fn test_close_signal_pends_until_requested() {
        let (conn, mut peer) = WorkerConnection::channel(None, 4);
        let mut requested = tokio_test::task::spawn(peer.close.requested());

        tokio_test::assert_pending!(requested.poll());

        conn.close("coordinator shutting down");
        assert!(requested.is_woken());
        tokio_test::assert_ready_eq!(requested.poll(), "coordinator shutting down".to_string());
    }
}
