//! Protocol module for worker communication
//!
//! Defines the message types and serialization for the coordinator-worker
//! protocol. The protocol uses JSON over WebSocket.

mod messages;

pub use messages::*;
