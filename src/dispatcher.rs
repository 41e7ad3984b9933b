//! Public entry point: builder, role detection, master handle.
//!
//! # Data Flow
//! ```text
//! Dispatcher::builder(config).pre_master(..).post_master(..).worker(..).build()
//!     → start()
//!         worker env present → worker runtime (never returns until the master leaves)
//!         otherwise          → spawn_master() → wait for SIGINT → MasterHandle::shutdown()
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::cluster::{Supervisor, Topology, WorkerCommand, WorkerId, WorkerSnapshot};
use crate::config::loader::ConfigError;
use crate::config::validation::validate_config;
use crate::config::DispatcherConfig;
use crate::control::ControlChannel;
use crate::error::{BoxError, DispatchError};
use crate::lifecycle::hooks::{hook, worker_factory};
use crate::lifecycle::{signals, Hook, Shutdown, WorkerFactory};
use crate::net::{ConnectionTable, Listener};
use crate::routing::ConnectionRouter;
use crate::worker::{self, WorkerEnv};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Multi-process connection dispatcher.
pub struct Dispatcher {
    config: DispatcherConfig,
    pre_master: Option<Hook>,
    post_master: Option<Hook>,
    worker: Option<WorkerFactory>,
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    pre_master: Option<Hook>,
    post_master: Option<Hook>,
    worker: Option<WorkerFactory>,
}

impl DispatcherBuilder {
    /// Runs once in the master before the listening socket opens. An error aborts startup.
    pub fn pre_master<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.pre_master = Some(hook(f));
        self
    }

    /// Runs once in the master, the first time every configured worker is ready.
    pub fn post_master<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.post_master = Some(hook(f));
        self
    }

    /// Builds the application inside each worker process.
    pub fn worker<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(WorkerId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<axum::Router, BoxError>> + Send + 'static,
    {
        self.worker = Some(worker_factory(f));
        self
    }

    /// Validate the configuration and finish the builder.
    pub fn build(self) -> Result<Dispatcher, DispatchError> {
        validate_config(&self.config).map_err(ConfigError::Validation)?;
        Ok(Dispatcher {
            config: self.config,
            pre_master: self.pre_master,
            post_master: self.post_master,
            worker: self.worker,
        })
    }
}

impl Dispatcher {
    pub fn builder(config: DispatcherConfig) -> DispatcherBuilder {
        DispatcherBuilder {
            config,
            pre_master: None,
            post_master: None,
            worker: None,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run as whatever this process is: a worker if the worker environment is
    /// set, the master otherwise. The master returns after SIGINT and shutdown.
    pub async fn start(self) -> Result<(), DispatchError> {
        if let Some(env) = WorkerEnv::from_env()? {
            return self.run_worker(env).await;
        }

        let master = self.spawn_master().await?;
        signals::shutdown_on_interrupt(master.shutdown_signal()).await;
        master.shutdown().await;
        Ok(())
    }

    /// Run the worker side. Called once per worker process.
    pub async fn run_worker(self, env: WorkerEnv) -> Result<(), DispatchError> {
        let factory = self.worker.ok_or(DispatchError::MissingWorkerFactory)?;
        let span = tracing::info_span!("worker", id = %env.id);

        async move {
            let _interrupts = signals::ignore_interrupts();
            // SAFETY: the descriptor was installed by the master for this process
            // and is adopted exactly once.
            let channel = unsafe { ControlChannel::from_inherited(env.control_fd)? };
            worker::run(env.id, channel, factory).await
        }
        .instrument(span)
        .await
    }

    /// Start the master: pre_master, listener, workers, accept loop.
    pub async fn spawn_master(self) -> Result<MasterHandle, DispatchError> {
        let config = self.config;

        if let Some(pre_master) = &self.pre_master {
            pre_master().await.map_err(DispatchError::PreMaster)?;
            tracing::info!("pre_master hook completed");
        }

        let command = WorkerCommand::resolve(&config.process)?;
        let listener = Listener::bind(&config.listener).await?;
        let local_addr = listener.local_addr();

        let topology = Arc::new(Topology::new());
        let connections = Arc::new(ConnectionTable::new());
        let shutdown = Shutdown::new();
        let kill_grace = Duration::from_millis(config.shutdown.kill_grace_ms);

        let supervisor = Supervisor::new(
            command,
            config.cluster.workers,
            Arc::clone(&topology),
            Arc::clone(&connections),
            shutdown.clone(),
            self.post_master,
        );
        if let Err(e) = supervisor.start() {
            tracing::error!(error = %e, "Failed to spawn workers");
            shutdown.trigger();
            supervisor.terminate_all(kill_grace).await;
            return Err(e.into());
        }

        let router = ConnectionRouter::from_config(
            &config,
            Arc::clone(&topology),
            Arc::clone(&connections),
            shutdown.clone(),
        );
        let accept = tokio::spawn(Arc::clone(&router).run(listener));

        tracing::info!(
            address = %local_addr,
            workers = config.cluster.workers,
            balance = ?config.routing.balance,
            sticky = ?config.routing.sticky,
            "Dispatcher started"
        );

        Ok(MasterHandle {
            local_addr,
            expected: config.cluster.workers,
            topology,
            connections,
            router,
            supervisor,
            shutdown,
            accept,
            kill_grace,
        })
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("pre_master", &self.pre_master.is_some())
            .field("post_master", &self.post_master.is_some())
            .field("worker", &self.worker.is_some())
            .finish()
    }
}

/// Running master. Dropping it does not stop the dispatcher; call [`MasterHandle::shutdown`].
#[derive(Debug)]
pub struct MasterHandle {
    local_addr: SocketAddr,
    expected: usize,
    topology: Arc<Topology>,
    connections: Arc<ConnectionTable>,
    router: Arc<ConnectionRouter>,
    supervisor: Arc<Supervisor>,
    shutdown: Shutdown,
    accept: JoinHandle<()>,
    kill_grace: Duration,
}

impl MasterHandle {
    /// Address of the listening socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn ready_workers(&self) -> usize {
        self.topology.ready_count()
    }

    pub fn workers(&self) -> Vec<WorkerSnapshot> {
        self.topology.snapshot()
    }

    /// Connections handed off and not yet reported closed.
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    pub fn post_master_fired(&self) -> bool {
        self.supervisor.post_master_fired()
    }

    /// Shared shutdown flag; triggering it stops the accept loop.
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Wait until every configured worker is ready. Returns false on timeout.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.topology.ready_count() < self.expected {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        true
    }

    /// Stop accepting, destroy tracked connections, then terminate every worker.
    pub async fn shutdown(self) {
        self.shutdown.trigger();
        if let Err(e) = self.accept.await {
            tracing::error!(error = %e, "Accept loop panicked");
        }

        let destroyed = self.router.drain();
        tracing::info!(connections = destroyed, "Connections destroyed");

        self.supervisor.terminate_all(self.kill_grace).await;
        tracing::info!("Shutdown complete");
    }
}
