//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (hooks.rs):
//!     pre_master → bind listener → spawn workers → all READY → post_master (once)
//!
//! Shutdown (shutdown.rs):
//!     Trigger → stop accepting → destroy connections → SIGTERM workers → SIGKILL stragglers
//!
//! Signals (signals.rs):
//!     SIGINT at the master → trigger shutdown
//!     SIGINT at a worker → ignored; the master owns shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: a failing pre_master means no listener ever opens
//! - Ordered shutdown: stop accept, destroy, kill
//! - Shutdown has timeout: forced kill after the grace period

pub mod hooks;
pub mod shutdown;
pub mod signals;

pub use hooks::{Hook, PostMasterLatch, WorkerFactory};
pub use shutdown::Shutdown;
