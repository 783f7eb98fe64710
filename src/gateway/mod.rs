//! WebSocket gateway for training workers
//!
//! Accepts worker connections, registers them with the
//! [`ConnectionRegistry`](crate::registry::ConnectionRegistry) and pumps
//! frames between each socket and its [`WorkerConnection`](crate::registry::WorkerConnection).

mod server;

pub use server::{Gateway, CLOSE_LINGER};
