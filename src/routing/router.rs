//! Connection routing and dispatch.
//!
//! # Responsibilities
//! - Own the accept loop of the master's listening socket
//! - Resolve the sticky key of each connection
//! - Select a ready worker (sticky mapping first, then the balancing strategy)
//! - Record the connection and hand the live socket to the worker
//! - Refuse connections when no worker becomes ready within the retry budget
//!
//! # Design Decisions
//! - One task per connection; a slow client only delays its own routing
//! - The decision lock is synchronous and never held across an await
//! - The record is inserted before CONNECTION is sent, so an early
//!   SOCKET_CLOSE from the worker always finds it

use std::net::SocketAddr;
use std::os::fd::AsFd;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::TcpStream;

use crate::cluster::{Topology, WorkerId};
use crate::config::{DispatcherConfig, StickySource};
use crate::control::{ControlChannel, ControlMessage};
use crate::lifecycle::Shutdown;
use crate::load_balancer::{self, LoadBalancer};
use crate::net::{sniff_sticky_key, ConnectionId, ConnectionRecord, ConnectionTable, Listener};
use crate::observability::metrics;
use crate::routing::StickyTable;

/// Pause after a failed accept, so descriptor exhaustion does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Routing parameters taken from the configuration.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub sticky: StickySource,
    pub max_sniff_bytes: usize,
    pub wait_attempts: u32,
    pub wait_interval: Duration,
}

impl RouterSettings {
    pub fn from_config(config: &DispatcherConfig) -> Self {
        Self {
            sticky: config.routing.sticky.clone(),
            max_sniff_bytes: config.routing.max_sniff_bytes,
            wait_attempts: config.startup.wait_attempts,
            wait_interval: Duration::from_millis(config.startup.wait_interval_ms),
        }
    }
}

/// A routing decision ready to be sent.
struct Handoff {
    id: ConnectionId,
    worker: WorkerId,
    channel: Arc<ControlChannel>,
    /// Duplicate of the recorded socket; this is what travels to the worker.
    handle: std::net::TcpStream,
}

/// Routes accepted connections to ready workers.
pub struct ConnectionRouter {
    settings: RouterSettings,
    topology: Arc<Topology>,
    connections: Arc<ConnectionTable>,
    sticky: StickyTable,
    balancer: Box<dyn LoadBalancer>,
    decision: Mutex<()>,
    shutdown: Shutdown,
}

impl ConnectionRouter {
    pub fn new(
        settings: RouterSettings,
        balancer: Box<dyn LoadBalancer>,
        topology: Arc<Topology>,
        connections: Arc<ConnectionTable>,
        shutdown: Shutdown,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            topology,
            connections,
            sticky: StickyTable::new(),
            balancer,
            decision: Mutex::new(()),
            shutdown,
        })
    }

    /// Router for a configuration, with the configured balancing strategy.
    pub fn from_config(
        config: &DispatcherConfig,
        topology: Arc<Topology>,
        connections: Arc<ConnectionTable>,
        shutdown: Shutdown,
    ) -> Arc<Self> {
        Self::new(
            RouterSettings::from_config(config),
            load_balancer::build(config.routing.balance),
            topology,
            connections,
            shutdown,
        )
    }

    /// Accept until shutdown is triggered, then close the listening socket.
    pub async fn run(self: Arc<Self>, listener: Listener) {
        let local_addr = listener.local_addr();
        loop {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tokio::spawn(Arc::clone(&self).dispatch(stream, peer));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }
        drop(listener);
        tracing::info!(address = %local_addr, "Listener closed");
    }

    /// Route one accepted connection.
    pub async fn dispatch(self: Arc<Self>, mut stream: TcpStream, peer: SocketAddr) {
        let (key, prelude) = match &self.settings.sticky {
            StickySource::Header(header) => {
                let limit = self.settings.max_sniff_bytes;
                let sniffed = tokio::select! {
                    sniffed = sniff_sticky_key(&mut stream, header, peer.ip(), limit) => sniffed,
                    _ = self.shutdown.wait() => {
                        tracing::debug!(
                            peer_addr = %peer,
                            "Shutdown while sniffing, closing connection"
                        );
                        return;
                    }
                };
                if let Some(reason) = sniffed.fallback_reason() {
                    tracing::debug!(
                        peer_addr = %peer,
                        reason,
                        "Sticky key fell back to remote address"
                    );
                    metrics::record_sticky_fallback(reason);
                }
                (sniffed.key, sniffed.prelude)
            }
            StickySource::RemoteAddress | StickySource::Disabled => {
                (peer.ip().to_string(), Vec::new())
            }
        };

        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(peer_addr = %peer, error = %e, "Failed to detach accepted socket");
                return;
            }
        };

        let mut pending = Some(stream);
        for attempt in 1..=self.settings.wait_attempts {
            if self.shutdown.is_triggered() {
                break;
            }
            match self.decide(&key, &mut pending) {
                Ok(Some(handoff)) => {
                    self.send(handoff, prelude, peer).await;
                    return;
                }
                Ok(None) => {
                    tracing::debug!(peer_addr = %peer, attempt, "No ready worker, waiting");
                }
                Err(e) => {
                    tracing::warn!(
                        peer_addr = %peer,
                        error = %e,
                        "Failed to duplicate socket for handoff"
                    );
                    break;
                }
            }
            if attempt < self.settings.wait_attempts {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.wait_interval) => {}
                    _ = self.shutdown.wait() => break,
                }
            }
        }

        if let Some(stream) = pending {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        if self.shutdown.is_triggered() {
            tracing::debug!(peer_addr = %peer, "Connection closed by shutdown before handoff");
            return;
        }
        metrics::record_refused();
        tracing::warn!(peer_addr = %peer, key = %key, "Connection refused: no ready worker");
    }

    /// Pick a worker and record the connection. `Ok(None)` when nobody is ready
    /// or shutdown has begun.
    ///
    /// On success the socket is moved out of `pending` into the connection table.
    fn decide(
        &self,
        key: &str,
        pending: &mut Option<std::net::TcpStream>,
    ) -> std::io::Result<Option<Handoff>> {
        let _decision = self.decision.lock().unwrap_or_else(PoisonError::into_inner);
        // checked under the lock so a record can never be inserted after `drain`
        if self.shutdown.is_triggered() {
            return Ok(None);
        }

        let ready = self.topology.ready_workers();
        if ready.is_empty() {
            return Ok(None);
        }

        let (worker, sticky_hit) = match self.sticky_worker(key) {
            Some(worker) => (worker, true),
            None => {
                let Some(worker) = self.balancer.next_worker(&ready, &self.connections) else {
                    return Ok(None);
                };
                if self.settings.sticky.is_enabled() {
                    self.sticky.assign(key, worker);
                }
                (worker, false)
            }
        };

        let Some(channel) = self.topology.ready_channel(worker) else {
            return Ok(None);
        };
        let Some(stream) = pending.take() else {
            return Ok(None);
        };
        let handle = match stream.try_clone() {
            Ok(handle) => handle,
            Err(e) => {
                *pending = Some(stream);
                return Err(e);
            }
        };

        let id = ConnectionId::new();
        self.connections
            .insert(ConnectionRecord::new(id, key.to_string(), worker, stream));
        metrics::set_active_connections(self.connections.len());
        if sticky_hit {
            self.balancer.note_sticky_route();
        }

        Ok(Some(Handoff {
            id,
            worker,
            channel,
            handle,
        }))
    }

    /// Live sticky mapping for `key`, dropping it if its worker is gone.
    fn sticky_worker(&self, key: &str) -> Option<WorkerId> {
        if !self.settings.sticky.is_enabled() {
            return None;
        }
        let worker = self.sticky.lookup(key)?;
        if self.topology.is_ready(worker) {
            return Some(worker);
        }
        self.sticky.forget(key);
        tracing::debug!(key, worker_id = %worker, "Dropped sticky mapping to exited worker");
        None
    }

    async fn send(&self, handoff: Handoff, prelude: Vec<u8>, peer: SocketAddr) {
        let Handoff {
            id,
            worker,
            channel,
            handle,
        } = handoff;
        let prelude_len = prelude.len();
        let message = ControlMessage::Connection {
            connection_id: id,
            prelude,
        };

        match channel.send(&message, Some(handle.as_fd())).await {
            Ok(()) => {
                metrics::record_routed(worker);
                tracing::debug!(
                    connection_id = %id,
                    worker_id = %worker,
                    peer_addr = %peer,
                    prelude_len,
                    "Connection handed off"
                );
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %id,
                    worker_id = %worker,
                    error = %e,
                    "Handoff failed"
                );
                self.connections.destroy(&id);
                metrics::set_active_connections(self.connections.len());
            }
        }
    }

    /// Destroy every recorded connection. Call after shutdown was triggered;
    /// no connection is recorded once this returns.
    pub fn drain(&self) -> usize {
        let _decision = self.decision.lock().unwrap_or_else(PoisonError::into_inner);
        self.connections.destroy_all()
    }

    /// Sticky mappings currently held.
    pub fn sticky_entries(&self) -> usize {
        self.sticky.len()
    }
}

impl std::fmt::Debug for ConnectionRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRouter")
            .field("settings", &self.settings)
            .field("balancer", &self.balancer)
            .field("sticky_entries", &self.sticky.len())
            .finish()
    }
}
