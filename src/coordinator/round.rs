//! One training round: broadcast, then a deadline-bounded collection barrier

use std::fmt;

use futures_util::future::join_all;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::Error;
use crate::params::ParameterSet;
use crate::protocol::{Incoming, Message};
use crate::registry::{ConnectionId, WorkerConnection};

// ─────────────────────────────────────────────────────────────────
// Discarded Responses
// ─────────────────────────────────────────────────────────────────

/// Why a participant's response did not count toward a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Nothing arrived before the round deadline
    Timeout,
    /// The connection closed before responding
    Disconnected,
    /// Not valid JSON, or a `fit_res` with unusable parameters
    Malformed,
    /// A well-formed frame of some type other than `fit_res`
    UnexpectedType,
    /// Parameters whose structure differs from the round's reference
    ShapeMismatch,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::Timeout => "timeout",
            DiscardReason::Disconnected => "disconnected",
            DiscardReason::Malformed => "malformed",
            DiscardReason::UnexpectedType => "unexpected_type",
            DiscardReason::ShapeMismatch => "shape_mismatch",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────
// Round Execution
// ─────────────────────────────────────────────────────────────────

/// Responses gathered from one round's participants
#[derive(Debug, Default)]
pub struct RoundOutcome {
    /// Accepted parameter sets, in participant order
    pub accepted: Vec<(ConnectionId, ParameterSet)>,
    pub discarded: Vec<(ConnectionId, DiscardReason)>,
}

impl RoundOutcome {
    pub fn accepted_parameters(&self) -> Vec<ParameterSet> {
        self.accepted.iter().map(|(_, set)| set.clone()).collect()
    }
}

/// Queue `message` for every participant; returns how many accepted it
///
/// Frames a participant queued before this call are dropped first, so only
/// replies to this broadcast can be collected afterwards. Delivery never
/// waits: a participant whose outbound queue is full simply misses the round.
pub(crate) async fn broadcast(participants: &[WorkerConnection], message: &Message) -> usize {
    let text = match message.to_json() {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Failed to encode broadcast");
            return 0;
        }
    };

    let sends = participants.iter().map(|connection| {
        let text = text.clone();
        async move {
            let stale = connection.discard_pending().await;
            if stale > 0 {
                debug!(connection = %connection.id(), frames = stale, "Dropped stale frames");
            }
            match connection.send_text(text) {
                Ok(()) => true,
                Err(e @ Error::OutboundQueueFull { .. }) => {
                    warn!(connection = %connection.id(), error = %e, "Worker is not reading, skipping");
                    false
                }
                Err(e) => {
                    debug!(connection = %connection.id(), error = %e, "Broadcast send failed");
                    false
                }
            }
        }
    });

    join_all(sends).await.into_iter().filter(|sent| *sent).count()
}

/// Wait for one reply from every participant, all bounded by the same deadline
///
/// Shapes are checked against `reference`, or against the first accepted
/// reply when `reference` is empty.
pub(crate) async fn collect(
    participants: &[WorkerConnection],
    reference: &ParameterSet,
    deadline: Instant,
) -> RoundOutcome {
    let replies = join_all(participants.iter().map(|connection| async move {
        (connection.id(), await_reply(connection, deadline).await)
    }))
    .await;

    let mut outcome = RoundOutcome::default();
    let mut shape: Option<ParameterSet> = (!reference.is_empty()).then(|| reference.clone());

    for (id, reply) in replies {
        let parameters = match reply {
            Ok(parameters) => parameters,
            Err(reason) => {
                outcome.discarded.push((id, reason));
                continue;
            }
        };

        match &shape {
            Some(expected) if !expected.same_shape(&parameters) => {
                outcome.discarded.push((id, DiscardReason::ShapeMismatch));
            }
            Some(_) => outcome.accepted.push((id, parameters)),
            None => {
                shape = Some(parameters.clone());
                outcome.accepted.push((id, parameters));
            }
        }
    }

    outcome
}

/// First frame from `connection`, classified
async fn await_reply(
    connection: &WorkerConnection,
    deadline: Instant,
) -> std::result::Result<ParameterSet, DiscardReason> {
    let frame = match timeout_at(deadline, connection.recv()).await {
        Ok(Some(frame)) => frame,
        Ok(None) => return Err(DiscardReason::Disconnected),
        Err(_) => return Err(DiscardReason::Timeout),
    };

    match Message::decode(&frame) {
        Incoming::Known(Message::FitResult(result)) => Ok(result.parameters),
        Incoming::Known(other) => {
            debug!(connection = %connection.id(), kind = other.type_name(), "Unexpected reply");
            Err(DiscardReason::UnexpectedType)
        }
        Incoming::Unrecognized {
            type_name: Some(type_name),
            ..
        } if type_name != "fit_res" => {
            debug!(connection = %connection.id(), kind = %type_name, "Unexpected reply");
            Err(DiscardReason::UnexpectedType)
        }
        Incoming::Unrecognized { reason, .. } => {
            debug!(connection = %connection.id(), reason = %reason, "Malformed reply");
            Err(DiscardReason::Malformed)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::protocol::{FitConfig, FitInstruction};
    use crate::registry::ConnectionPeer;

    fn set(values: &[f32]) -> ParameterSet {
        ParameterSet(vec![values.to_vec().into()])
    }

    fn deadline_in(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    async fn reply(peer: &ConnectionPeer, frame: &str) {
        peer.inbound.send(frame.as_bytes().to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_reaches_live_connections() {
        let (a, mut peer_a) = WorkerConnection::channel(None, 4);
        let (b, peer_b) = WorkerConnection::channel(None, 4);
        drop(peer_b);

        let message = Message::Fit(FitInstruction {
            parameters: set(&[1.0]),
            config: FitConfig { epochs: 3 },
        });
        assert_eq!(broadcast(&[a, b], &message).await, 1);

        let text = peer_a.outbound.recv().await.unwrap();
        assert_eq!(serde_json::from_str::<Message>(&text).unwrap(), message);
    }

    #[tokio::test]
    async fn test_broadcast_skips_worker_that_stopped_reading() {
        // Transport alive but never draining its queue
        let (stuck, _stuck_peer) = WorkerConnection::channel(None, 1);
        let (healthy, mut healthy_peer) = WorkerConnection::channel(None, 1);

        let message = Message::Fit(FitInstruction {
            parameters: set(&[1.0]),
            config: FitConfig { epochs: 1 },
        });
        assert_eq!(broadcast(std::slice::from_ref(&stuck), &message).await, 1);

        let delivered = tokio::time::timeout(
            Duration::from_secs(2),
            broadcast(&[stuck.clone(), healthy], &message),
        )
        .await
        .expect("broadcast waited on a full queue");

        assert_eq!(delivered, 1);
        assert!(healthy_peer.outbound.recv().await.is_some());

        // The stuck worker still gets told to close
        assert!(stuck.close("training finished"));
    }

    #[tokio::test]
    async fn test_broadcast_drops_stale_frames() {
        let (a, peer_a) = WorkerConnection::channel(None, 4);
        reply(&peer_a, r#"{"type":"fit_res","parameters":[[9.0]]}"#).await;

        let message = Message::Fit(FitInstruction {
            parameters: ParameterSet::empty(),
            config: FitConfig { epochs: 1 },
        });
        broadcast(std::slice::from_ref(&a), &message).await;

        let outcome = collect(&[a], &ParameterSet::empty(), deadline_in(50)).await;
        assert!(outcome.accepted.is_empty());
        assert_eq!(outcome.discarded[0].1, DiscardReason::Timeout);
    }

    #[tokio::test]
    async fn test_collect_classifies_replies() {
        let peers: Vec<_> = (0..6).map(|_| WorkerConnection::channel(None, 4)).collect();
        let connections: Vec<_> = peers.iter().map(|(c, _)| c.clone()).collect();

        reply(&peers[0].1, r#"{"type":"fit_res","parameters":[[1.0,2.0]]}"#).await;
        reply(&peers[1].1, "not json").await;
        reply(&peers[2].1, r#"{"type":"fit","parameters":[],"config":{"epochs":1}}"#).await;
        reply(&peers[3].1, r#"{"type":"evaluate_res","loss":0.1}"#).await;
        reply(&peers[4].1, r#"{"type":"fit_res","parameters":[[1.0]]}"#).await;
        // peers[5] stays silent

        let outcome = collect(&connections, &ParameterSet::empty(), deadline_in(50)).await;

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].0, connections[0].id());

        let reasons: Vec<_> = outcome.discarded.iter().map(|(_, r)| *r).collect();
        assert_eq!(
            reasons,
            vec![
                DiscardReason::Malformed,
                DiscardReason::UnexpectedType,
                DiscardReason::UnexpectedType,
                DiscardReason::ShapeMismatch,
                DiscardReason::Timeout,
            ]
        );
    }

    #[tokio::test]
    async fn test_collect_uses_global_shape_as_reference() {
        let (a, peer_a) = WorkerConnection::channel(None, 4);
        let (b, peer_b) = WorkerConnection::channel(None, 4);
        reply(&peer_a, r#"{"type":"fit_res","parameters":[[1.0]]}"#).await;
        reply(&peer_b, r#"{"type":"fit_res","parameters":[[1.0,2.0]]}"#).await;

        let outcome = collect(&[a, b.clone()], &set(&[0.0, 0.0]), deadline_in(50)).await;

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].0, b.id());
        assert_eq!(outcome.discarded[0].1, DiscardReason::ShapeMismatch);
    }

    #[tokio::test]
    async fn test_collect_reports_disconnect() {
        let (a, peer_a) = WorkerConnection::channel(None, 4);
        drop(peer_a);

        let outcome = collect(&[a], &ParameterSet::empty(), deadline_in(1_000)).await;
        assert_eq!(outcome.discarded[0].1, DiscardReason::Disconnected);
    }

    #[tokio::test]
    async fn test_collect_shares_one_deadline() {
        let connections: Vec<_> = (0..4).map(|_| WorkerConnection::channel(None, 4)).collect();
        let handles: Vec<_> = connections.iter().map(|(c, _)| c.clone()).collect();

        let started = Instant::now();
        let outcome = collect(&handles, &ParameterSet::empty(), deadline_in(100)).await;

        assert_eq!(outcome.discarded.len(), 4);
        // Sequential waits would take four deadlines
        assert!(started.elapsed() < Duration::from_millis(350));
    }
}
