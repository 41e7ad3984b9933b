//! Multi-process connection dispatcher.
//!
//! A master process owns one listening socket, picks a worker process for
//! every accepted connection (optionally pinning clients by a sticky key) and
//! passes the live socket, plus any bytes already read from it, to that
//! worker. Workers serve an `axum::Router` as if they had accepted the
//! connection themselves.

// Core subsystems
pub mod config;
pub mod control;
pub mod net;
pub mod routing;

// Process management
pub mod cluster;
pub mod load_balancer;
pub mod worker;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;

pub mod dispatcher;

pub use cluster::{WorkerId, WorkerSnapshot};
pub use config::schema::DispatcherConfig;
pub use dispatcher::{Dispatcher, DispatcherBuilder, MasterHandle};
pub use error::{BoxError, DispatchError};
pub use lifecycle::Shutdown;
