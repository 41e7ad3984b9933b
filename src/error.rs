//! Crate-level error taxonomy.
//!
//! Only spawn failures, listener failures and pre-start hook failures ever
//! reach the caller of `start()`. Everything that happens to an individual
//! connection is handled (and logged) where it occurs.

use thiserror::Error;

use crate::cluster::spawn::SpawnError;
use crate::config::loader::ConfigError;
use crate::control::ControlError;
use crate::net::listener::ListenerError;

/// Boxed error used for user-supplied hooks and the worker server factory.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A worker process could not be created.
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] SpawnError),

    /// The listening socket could not be opened.
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// The pre-start hook rejected; the listening socket was never opened.
    #[error("pre-master hook failed: {0}")]
    PreMaster(#[source] BoxError),

    /// The worker's server factory failed inside a worker process.
    #[error("worker server factory failed: {0}")]
    WorkerFactory(#[source] BoxError),

    /// This process was started as a worker but no server factory was registered.
    #[error("no worker server factory registered")]
    MissingWorkerFactory,

    /// The worker environment (id, control descriptor) is malformed.
    #[error("invalid worker environment: {0}")]
    WorkerEnvironment(String),

    /// The inter-process control channel failed.
    #[error("control channel error: {0}")]
    Control(#[from] ControlError),

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
