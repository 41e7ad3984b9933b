//! Worker supervision.
//!
//! # Responsibilities
//! - Spawn the configured number of workers and answer their handshake
//! - Track readiness and fire `post_master` once
//! - Drop ConnectionRecords on `SOCKET_CLOSE`
//! - Respawn crashed workers while the dispatcher is running
//! - Terminate every worker on shutdown (SIGTERM, then SIGKILL after a grace period)

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::cluster::spawn::{spawn_worker, SpawnError, SpawnedWorker, WorkerCommand};
use crate::cluster::{Topology, WorkerId};
use crate::control::{ControlChannel, ControlError, ControlMessage, Received};
use crate::lifecycle::hooks::spawn_post_master;
use crate::lifecycle::{Hook, PostMasterLatch, Shutdown};
use crate::net::ConnectionTable;
use crate::observability::metrics;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Owns the worker processes of one master.
pub struct Supervisor {
    command: WorkerCommand,
    expected: usize,
    topology: Arc<Topology>,
    connections: Arc<ConnectionTable>,
    shutdown: Shutdown,
    post_master: Option<Hook>,
    latch: PostMasterLatch,
    next_id: AtomicU32,
    /// Live worker processes, registered or not.
    processes: DashMap<WorkerId, u32>,
}

impl Supervisor {
    pub fn new(
        command: WorkerCommand,
        expected: usize,
        topology: Arc<Topology>,
        connections: Arc<ConnectionTable>,
        shutdown: Shutdown,
        post_master: Option<Hook>,
    ) -> Arc<Self> {
        Arc::new(Self {
            command,
            expected,
            topology,
            connections,
            shutdown,
            post_master,
            latch: PostMasterLatch::new(),
            next_id: AtomicU32::new(1),
            processes: DashMap::new(),
        })
    }

    /// Spawn the initial workers. The first spawn failure is returned.
    pub fn start(self: &Arc<Self>) -> Result<(), SpawnError> {
        for _ in 0..self.expected {
            self.spawn_one()?;
        }
        Ok(())
    }

    /// Number of worker processes currently alive.
    pub fn live_processes(&self) -> usize {
        self.processes.len()
    }

    /// Whether `post_master` has been triggered.
    pub fn post_master_fired(&self) -> bool {
        self.latch.has_fired()
    }

    fn spawn_one(self: &Arc<Self>) -> Result<WorkerId, SpawnError> {
        let id = WorkerId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let worker = spawn_worker(&self.command, id)?;
        self.processes.insert(id, worker.pid);
        tokio::spawn(Arc::clone(self).supervise(worker));
        Ok(id)
    }

    async fn supervise(self: Arc<Self>, worker: SpawnedWorker) {
        let SpawnedWorker {
            id,
            pid,
            mut child,
            channel,
        } = worker;
        let channel = Arc::new(channel);

        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                received = channel.recv() => match received {
                    Ok(Some(received)) => self.handle_message(id, pid, &channel, received).await,
                    Ok(None) => {
                        tracing::debug!(worker_id = %id, "Control channel closed");
                        self.topology.remove(id);
                        break child.wait().await;
                    }
                    Err(ControlError::Io(e)) => {
                        tracing::error!(
                            worker_id = %id,
                            error = %e,
                            "Control channel failed, killing worker"
                        );
                        self.topology.remove(id);
                        if let Err(e) = child.start_kill() {
                            tracing::warn!(worker_id = %id, error = %e, "Failed to kill worker");
                        }
                        break child.wait().await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            worker_id = %id,
                            error = %e,
                            "Discarding invalid control message"
                        );
                    }
                },
            }
        };

        self.processes.remove(&id);
        self.topology.remove(id);
        metrics::set_ready_workers(self.topology.ready_count());
        let dropped = self.connections.destroy_for_worker(id);
        metrics::set_active_connections(self.connections.len());

        if self.shutdown.is_triggered() {
            tracing::info!(worker_id = %id, pid, "Worker stopped");
            return;
        }

        match status {
            Ok(status) => {
                tracing::warn!(worker_id = %id, pid, %status, dropped, "Worker exited, respawning")
            }
            Err(e) => {
                tracing::warn!(worker_id = %id, pid, error = %e, dropped, "Worker lost, respawning")
            }
        }

        metrics::record_worker_restart();
        match self.spawn_one() {
            Ok(replacement) => tracing::info!(
                worker_id = %id,
                replacement = %replacement,
                "Replacement worker spawned"
            ),
            Err(e) => tracing::error!(worker_id = %id, error = %e, "Failed to respawn worker"),
        }
    }

    async fn handle_message(
        &self,
        id: WorkerId,
        pid: u32,
        channel: &Arc<ControlChannel>,
        received: Received,
    ) {
        match received.message {
            ControlMessage::Register => {
                self.topology.register(id, pid, Arc::clone(channel));
                tracing::info!(worker_id = %id, pid, "Worker registered");
                if let Err(e) = channel.send(&ControlMessage::Startup, None).await {
                    tracing::warn!(worker_id = %id, error = %e, "Failed to send STARTUP");
                }
            }
            ControlMessage::Ready => {
                let Some(ready) = self.topology.mark_ready(id) else {
                    tracing::warn!(worker_id = %id, "READY from unregistered worker");
                    return;
                };
                metrics::set_ready_workers(ready);
                tracing::info!(worker_id = %id, ready, expected = self.expected, "Worker ready");

                if self.latch.should_fire(ready, self.expected) {
                    tracing::info!(workers = ready, "All workers ready");
                    if let Some(hook) = &self.post_master {
                        spawn_post_master(Arc::clone(hook));
                    }
                }
            }
            ControlMessage::SocketClose { connection_id } => {
                if self.connections.remove(&connection_id).is_some() {
                    tracing::trace!(worker_id = %id, %connection_id, "Connection closed by worker");
                    metrics::set_active_connections(self.connections.len());
                }
            }
            other => {
                tracing::warn!(
                    worker_id = %id,
                    message = other.kind(),
                    "Unexpected message from worker"
                );
            }
        }
    }

    /// SIGTERM every worker, wait up to `grace`, then SIGKILL the rest.
    ///
    /// Call only after shutdown was triggered, otherwise workers are respawned.
    pub async fn terminate_all(&self, grace: Duration) {
        let signalled = self.signal_all(Signal::SIGTERM);
        tracing::info!(workers = signalled, "Sent SIGTERM to workers");

        if self.wait_for_exit(grace).await {
            return;
        }

        let killed = self.signal_all(Signal::SIGKILL);
        tracing::warn!(workers = killed, "Workers did not exit in time, sent SIGKILL");
        self.wait_for_exit(grace).await;
    }

    fn signal_all(&self, signal: Signal) -> usize {
        let targets: Vec<(WorkerId, u32)> = self
            .processes
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        for (id, pid) in &targets {
            if let Err(e) = kill(Pid::from_raw(*pid as i32), signal) {
                tracing::debug!(worker_id = %id, pid, error = %e, "Failed to signal worker");
            }
        }
        targets.len()
    }

    /// Poll until every worker process has been reaped or `timeout` elapses.
    async fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.processes.is_empty() {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
        true
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("program", self.command.program())
            .field("expected", &self.expected)
            .field("live", &self.processes.len())
            .finish()
    }
}
