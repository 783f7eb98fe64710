//! Coordinator phases and per-session state

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::params::ParameterSet;

/// Where the coordinator is in its session cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoordinatorPhase {
    /// Waiting for enough workers to connect
    #[default]
    AwaitingQuorum,
    /// Quorum reached; pausing before the first round
    Starting,
    /// Broadcasting and collecting for the given round
    RoundActive(u32),
    /// Reducing the given round's responses
    Aggregating(u32),
    /// All rounds done; closing worker connections
    SessionComplete,
}

impl fmt::Display for CoordinatorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinatorPhase::AwaitingQuorum => write!(f, "awaiting_quorum"),
            CoordinatorPhase::Starting => write!(f, "starting"),
            CoordinatorPhase::RoundActive(round) => write!(f, "round_active({})", round),
            CoordinatorPhase::Aggregating(round) => write!(f, "aggregating({})", round),
            CoordinatorPhase::SessionComplete => write!(f, "session_complete"),
        }
    }
}

/// State owned by one training session
#[derive(Debug)]
pub(crate) struct SessionState {
    pub id: Uuid,
    pub number: u64,
    /// Empty until a round accepts at least one response
    pub global: ParameterSet,
    pub rounds_run: u32,
    pub started_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new(number: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            number,
            global: ParameterSet::empty(),
            rounds_run: 0,
            started_at: Utc::now(),
        }
    }

    pub fn summary(&self, completed: bool) -> SessionSummary {
        SessionSummary {
            session_id: self.id,
            session: self.number,
            rounds_run: self.rounds_run,
            completed,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Outcome of a finished or aborted session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub session: u64,
    pub rounds_run: u32,
    /// `false` when the session was aborted because no workers were left
    pub completed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = self.finished_at - self.started_at;
        write!(
            f,
            "session {} ({}) {} after {} round(s) in {:.1}s",
            self.session,
            self.session_id,
            if self.completed { "completed" } else { "aborted" },
            self.rounds_run,
            elapsed.num_milliseconds() as f64 / 1000.0
        )
    }
}
