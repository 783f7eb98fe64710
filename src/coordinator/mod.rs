//! Training round coordination
//!
//! Runs federated averaging sessions over the workers in the connection
//! registry:
//! - Quorum wait before each session
//! - Fit broadcast and deadline-bounded response barrier per round
//! - Aggregation into the session's global parameters
//! - Graceful close of every worker when the session ends

mod round;
mod runner;
mod state;

pub use runner::*;
