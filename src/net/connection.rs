//! Connection records and the master's connection table.
//!
//! # Responsibilities
//! - Generate unique connection IDs for the handoff protocol
//! - Keep the master's copy of every handed-off socket until the worker reports it closed
//! - Count open connections per worker (active-connections balancing)
//! - Forcibly destroy connections on worker exit and on shutdown

use std::collections::HashMap;
use std::net::{Shutdown, TcpStream};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cluster::WorkerId;

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a new random connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A connection handed off to a worker and not yet reported closed.
#[derive(Debug)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    /// Remote address or resolved sticky key.
    pub address: String,
    pub worker: WorkerId,
    /// Master-side handle of the socket. Kept so shutdown can destroy it.
    stream: Option<TcpStream>,
}

impl ConnectionRecord {
    pub fn new(id: ConnectionId, address: String, worker: WorkerId, stream: TcpStream) -> Self {
        Self {
            id,
            address,
            worker,
            stream: Some(stream),
        }
    }

    /// Record without a socket, for accounting only.
    pub fn detached(id: ConnectionId, address: String, worker: WorkerId) -> Self {
        Self {
            id,
            address,
            worker,
            stream: None,
        }
    }

    /// Shut the socket down in both directions, for every process holding it.
    fn destroy(self) {
        if let Some(stream) = self.stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
        tracing::debug!(connection_id = %self.id, worker = %self.worker, "Connection destroyed");
    }
}

/// Live ConnectionRecords owned by the router.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    records: DashMap<ConnectionId, ConnectionRecord>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ConnectionRecord) {
        self.records.insert(record.id, record);
    }

    /// Drop a record after the worker reported `SOCKET_CLOSE`.
    ///
    /// The master's handle is closed without a shutdown, so the worker's close
    /// semantics are what the client observes.
    pub fn remove(&self, id: &ConnectionId) -> Option<ConnectionRecord> {
        self.records.remove(id).map(|(_, record)| record)
    }

    /// Remove and force-close one connection. Returns false if it was unknown.
    pub fn destroy(&self, id: &ConnectionId) -> bool {
        match self.remove(id) {
            Some(record) => {
                record.destroy();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Open connections per worker.
    ///
    /// Scans the whole table; O(connections) per call.
    pub fn counts_by_worker(&self) -> HashMap<WorkerId, usize> {
        let mut counts = HashMap::new();
        for entry in self.records.iter() {
            *counts.entry(entry.worker).or_insert(0) += 1;
        }
        counts
    }

    /// Destroy every connection assigned to `worker`. Returns how many were dropped.
    pub fn destroy_for_worker(&self, worker: WorkerId) -> usize {
        let ids: Vec<ConnectionId> = self
            .records
            .iter()
            .filter(|entry| entry.worker == worker)
            .map(|entry| *entry.key())
            .collect();
        let mut destroyed = 0;
        for id in ids {
            if let Some(record) = self.remove(&id) {
                record.destroy();
                destroyed += 1;
            }
        }
        destroyed
    }

    /// Destroy every tracked connection. Returns how many were dropped.
    pub fn destroy_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.records.iter().map(|entry| *entry.key()).collect();
        let mut destroyed = 0;
        for id in ids {
            if let Some(record) = self.remove(&id) {
                tracing::info!(connection_id = %record.id, "Destroying connection");
                record.destroy();
                destroyed += 1;
            }
        }
        destroyed
    }
}
