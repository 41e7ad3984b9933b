//! Worker runtime subsystem (inside each worker process).
//!
//! # Data Flow
//! ```text
//! process start (CONN_DISPATCHER_WORKER_ID set)
//!     → adopt control channel at fd 3
//!     → REGISTER, wait for STARTUP
//!     → run the worker factory → axum Router bound on 127.0.0.1:0
//!     → READY
//!     → per CONNECTION: adopt socket → replay.rs prefix → hyper connection → SOCKET_CLOSE
//! ```
//!
//! # Design Decisions
//! - The loopback listener and handed-off sockets serve the same Router
//! - The worker exits when the master's end of the control channel closes

pub mod replay;
pub mod runtime;

use std::os::fd::RawFd;

use crate::cluster::spawn::{CONTROL_FD_ENV, WORKER_ID_ENV};
use crate::cluster::WorkerId;
use crate::error::DispatchError;

pub use replay::Replay;
pub use runtime::run;

/// True in processes started by the master as workers.
pub fn is_worker_process() -> bool {
    std::env::var_os(WORKER_ID_ENV).is_some()
}

/// What a worker learns from its environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerEnv {
    pub id: WorkerId,
    pub control_fd: RawFd,
}

impl WorkerEnv {
    /// `Ok(None)` when this process is not a worker.
    pub fn from_env() -> Result<Option<Self>, DispatchError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, DispatchError> {
        let Some(id) = lookup(WORKER_ID_ENV) else {
            return Ok(None);
        };
        let id = id
            .parse::<WorkerId>()
            .map_err(|e| DispatchError::WorkerEnvironment(format!("{WORKER_ID_ENV}={id}: {e}")))?;
        let fd = lookup(CONTROL_FD_ENV).ok_or_else(|| {
            DispatchError::WorkerEnvironment(format!("{CONTROL_FD_ENV} is not set"))
        })?;
        let control_fd = fd
            .trim()
            .parse::<RawFd>()
            .map_err(|e| DispatchError::WorkerEnvironment(format!("{CONTROL_FD_ENV}={fd}: {e}")))?;
        Ok(Some(Self { id, control_fd }))
    }
}
