//! The master's WorkerRecord table.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::cluster::WorkerId;
use crate::control::ControlChannel;

/// One registered worker process.
#[derive(Debug)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub pid: u32,
    pub ready: bool,
    pub channel: Arc<ControlChannel>,
}

/// Read-only view of a worker for embedders and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub id: u32,
    pub pid: u32,
    pub ready: bool,
}

/// Registered workers, keyed by id.
#[derive(Debug, Default)]
pub struct Topology {
    workers: DashMap<WorkerId, WorkerRecord>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker sent REGISTER: known, not ready.
    pub fn register(&self, id: WorkerId, pid: u32, channel: Arc<ControlChannel>) {
        self.workers.insert(
            id,
            WorkerRecord {
                id,
                pid,
                ready: false,
                channel,
            },
        );
    }

    /// Worker sent READY. Returns the ready count afterwards, or `None` if
    /// the worker is unknown.
    pub fn mark_ready(&self, id: WorkerId) -> Option<usize> {
        {
            let mut record = self.workers.get_mut(&id)?;
            record.ready = true;
        }
        Some(self.ready_count())
    }

    pub fn remove(&self, id: WorkerId) -> Option<WorkerRecord> {
        self.workers.remove(&id).map(|(_, record)| record)
    }

    /// Ready worker ids in ascending order.
    pub fn ready_workers(&self) -> Vec<WorkerId> {
        let mut ready: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|entry| entry.ready)
            .map(|entry| entry.id)
            .collect();
        ready.sort_unstable();
        ready
    }

    pub fn ready_count(&self) -> usize {
        self.workers.iter().filter(|entry| entry.ready).count()
    }

    pub fn is_ready(&self, id: WorkerId) -> bool {
        self.workers.get(&id).is_some_and(|record| record.ready)
    }

    /// Control channel of a ready worker.
    pub fn ready_channel(&self, id: WorkerId) -> Option<Arc<ControlChannel>> {
        self.workers
            .get(&id)
            .filter(|record| record.ready)
            .map(|record| Arc::clone(&record.channel))
    }

    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        let mut workers: Vec<WorkerSnapshot> = self
            .workers
            .iter()
            .map(|entry| WorkerSnapshot {
                id: entry.id.get(),
                pid: entry.pid,
                ready: entry.ready,
            })
            .collect();
        workers.sort_by_key(|w| w.id);
        workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
