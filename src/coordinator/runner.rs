//! Session loop
//!
//! Drives the phase cycle: wait for quorum, run the configured number of
//! rounds against registry snapshots, close every worker, cool down, repeat.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::params::{self, ParameterSet};
use crate::protocol::{FitConfig, FitInstruction, Message};
use crate::registry::{ConnectionId, ConnectionRegistry, WorkerConnection};

use super::round::{self, DiscardReason, RoundOutcome};
use super::state::{CoordinatorPhase, SessionState, SessionSummary};

/// Close reason sent to every worker when a session ends
pub const SESSION_CLOSE_REASON: &str = "training finished";

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Runtime parameters for training sessions
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Connected workers required before a session starts
    pub min_workers: usize,

    /// Rounds per session
    pub total_rounds: u32,

    /// Local epochs requested from workers each round
    pub local_epochs: u32,

    /// Quorum polling interval
    pub poll_interval: Duration,

    /// Pause between quorum and the first round
    pub start_delay: Duration,

    /// Pause between rounds
    pub round_interval: Duration,

    /// Pause after a session before waiting for quorum again
    pub cooldown: Duration,

    /// How long a round waits for replies
    pub response_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            total_rounds: 5,
            local_epochs: 1,
            poll_interval: Duration::from_secs(1),
            start_delay: Duration::from_secs(3),
            round_interval: Duration::from_secs(1),
            cooldown: Duration::from_secs(2),
            response_timeout: Duration::from_secs(60),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Event Channel
// ─────────────────────────────────────────────────────────────────

/// Events emitted by the coordinator
///
/// `main` turns these into the operator-facing log records.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// Entered a new phase
    PhaseChanged(CoordinatorPhase),

    /// Enough workers are connected to start a session
    QuorumReached { workers: usize },

    /// A round's fit instruction went out; `delivered` counts queued sends
    RoundStarted {
        session: Uuid,
        round: u32,
        participants: usize,
        delivered: usize,
    },

    ResponseAccepted {
        round: u32,
        connection: ConnectionId,
    },

    ResponseDiscarded {
        round: u32,
        connection: ConnectionId,
        reason: DiscardReason,
    },

    /// Aggregation finished; `global` is the session's parameters afterwards
    RoundCompleted {
        round: u32,
        accepted: usize,
        discarded: usize,
        global: ParameterSet,
    },

    /// No workers were left at the start of a round
    SessionAborted { summary: SessionSummary },

    /// All rounds ran and `closed` workers were told to disconnect
    SessionCompleted {
        closed: usize,
        summary: SessionSummary,
    },
}

// ─────────────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────────────

/// Synchronous federated averaging coordinator
pub struct Coordinator {
    config: SessionConfig,
    registry: Arc<ConnectionRegistry>,
    event_tx: Option<mpsc::UnboundedSender<CoordinatorEvent>>,
    phase: CoordinatorPhase,
    sessions: u64,
}

impl Coordinator {
    /// Create a coordinator reading workers from `registry`
    pub fn new(config: SessionConfig, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            config,
            registry,
            event_tx: None,
            phase: CoordinatorPhase::AwaitingQuorum,
            sessions: 0,
        }
    }

    /// Publish [`CoordinatorEvent`]s on `event_tx`
    pub fn with_events(mut self, event_tx: mpsc::UnboundedSender<CoordinatorEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    #[cfg(test)]
    pub fn phase(&self) -> CoordinatorPhase {
        self.phase
    }

    /// Run sessions back to back, forever
    pub async fn run(mut self) {
        info!(
            min_workers = self.config.min_workers,
            total_rounds = self.config.total_rounds,
            response_timeout_ms = self.config.response_timeout.as_millis() as u64,
            "Coordinator started"
        );

        loop {
            let summary = self.run_session().await;
            debug!(summary = %summary, "Session finished");
        }
    }

    /// Run one session, starting from the quorum wait
    pub async fn run_session(&mut self) -> SessionSummary {
        self.set_phase(CoordinatorPhase::AwaitingQuorum);
        self.await_quorum().await;

        self.set_phase(CoordinatorPhase::Starting);
        tokio::time::sleep(self.config.start_delay).await;

        self.sessions += 1;
        let mut session = SessionState::new(self.sessions);
        info!(
            session = session.number,
            session_id = %session.id,
            workers = self.registry.len(),
            "Training session started"
        );

        for round in 1..=self.config.total_rounds {
            self.set_phase(CoordinatorPhase::RoundActive(round));

            let participants = self.registry.snapshot();
            if participants.is_empty() {
                let summary = session.summary(false);
                self.emit(CoordinatorEvent::SessionAborted {
                    summary: summary.clone(),
                });
                self.set_phase(CoordinatorPhase::AwaitingQuorum);
                return summary;
            }

            let outcome = self.run_round(&session, round, &participants).await;

            self.set_phase(CoordinatorPhase::Aggregating(round));
            self.aggregate(&mut session, round, outcome);

            if round < self.config.total_rounds {
                tokio::time::sleep(self.config.round_interval).await;
            }
        }

        self.set_phase(CoordinatorPhase::SessionComplete);
        let closed = self.registry.close_all(SESSION_CLOSE_REASON);
        let summary = session.summary(true);
        debug!(
            session = session.number,
            fingerprint = %session.global.fingerprint(),
            "Final parameters"
        );
        self.emit(CoordinatorEvent::SessionCompleted {
            closed,
            summary: summary.clone(),
        });

        tokio::time::sleep(self.config.cooldown).await;
        self.set_phase(CoordinatorPhase::AwaitingQuorum);

        summary
    }

    async fn await_quorum(&self) {
        loop {
            let workers = self.registry.len();
            if workers >= self.config.min_workers {
                self.emit(CoordinatorEvent::QuorumReached { workers });
                return;
            }
            debug!(workers, needed = self.config.min_workers, "Waiting for workers");
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Broadcast the global parameters and gather replies
    async fn run_round(
        &self,
        session: &SessionState,
        round: u32,
        participants: &[WorkerConnection],
    ) -> RoundOutcome {
        let instruction = Message::Fit(FitInstruction {
            parameters: session.global.clone(),
            config: FitConfig {
                epochs: self.config.local_epochs,
            },
        });

        let delivered = round::broadcast(participants, &instruction).await;
        self.emit(CoordinatorEvent::RoundStarted {
            session: session.id,
            round,
            participants: participants.len(),
            delivered,
        });

        let deadline = Instant::now() + self.config.response_timeout;
        let outcome = round::collect(participants, &session.global, deadline).await;

        for (connection, _) in &outcome.accepted {
            self.emit(CoordinatorEvent::ResponseAccepted {
                round,
                connection: *connection,
            });
        }
        for (connection, reason) in &outcome.discarded {
            self.emit(CoordinatorEvent::ResponseDiscarded {
                round,
                connection: *connection,
                reason: *reason,
            });
        }

        outcome
    }

    /// Replace the global parameters with the mean of the accepted replies
    fn aggregate(&self, session: &mut SessionState, round: u32, outcome: RoundOutcome) {
        session.rounds_run = round;

        let accepted = outcome.accepted_parameters();
        if accepted.is_empty() {
            warn!(
                session = session.number,
                round,
                discarded = outcome.discarded.len(),
                "No usable responses, keeping previous parameters"
            );
        } else {
            match params::average(&accepted) {
                Ok(global) => session.global = global,
                Err(e) => error!(round, error = %e, "Aggregation failed, keeping previous parameters"),
            }
        }

        self.emit(CoordinatorEvent::RoundCompleted {
            round,
            accepted: accepted.len(),
            discarded: outcome.discarded.len(),
            global: session.global.clone(),
        });
    }

    fn set_phase(&mut self, phase: CoordinatorPhase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "Phase change");
        }
        self.phase = phase;
        self.emit(CoordinatorEvent::PhaseChanged(phase));
    }

    fn emit(&self, event: CoordinatorEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
