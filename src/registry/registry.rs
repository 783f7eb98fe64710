//! Connection registry: the set of currently connected workers
//!
//! The transport adds and removes entries as channels open and close. The
//! coordinator reads through snapshots, so a round's participant set cannot
//! change under it, and clears the registry when a session ends.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use super::{ConnectionId, WorkerConnection};

// ─────────────────────────────────────────────────────────────────
// Connection Registry
// ─────────────────────────────────────────────────────────────────

/// Thread-safe registry of open worker connections
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<BTreeMap<ConnectionId, WorkerConnection>>,
}

impl ConnectionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; returns `false` if it was already present
    pub fn add(&self, connection: WorkerConnection) -> bool {
        let mut connections = self.connections.write();
        if connections.contains_key(&connection.id()) {
            return false;
        }
        connections.insert(connection.id(), connection);
        true
    }

    /// Remove a connection by id
    pub fn remove(&self, id: ConnectionId) -> Option<WorkerConnection> {
        self.connections.write().remove(&id)
    }

    /// Point-in-time copy of the registered connections, oldest first
    pub fn snapshot(&self) -> Vec<WorkerConnection> {
        self.connections.read().values().cloned().collect()
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Unregister every connection and ask each one to close gracefully
    ///
    /// Returns how many close requests reached a live transport.
    pub fn close_all(&self, reason: &str) -> usize {
        let drained = std::mem::take(&mut *self.connections.write());
        drained
            .values()
            .filter(|connection| connection.close(reason))
            .count()
    }
}
