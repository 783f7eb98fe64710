//! Worker connections
//!
//! Handles to individual worker channels and the registry that tracks the
//! ones currently open.

mod connection;
#[allow(clippy::module_inception)]
mod registry;

pub use connection::{ConnectionId, ConnectionPeer, WorkerConnection};
pub use registry::ConnectionRegistry;
