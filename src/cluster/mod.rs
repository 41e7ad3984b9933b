//! Process topology subsystem (master side).
//!
//! # Data Flow
//! ```text
//! Dispatcher::start
//!     → spawn.rs (re-exec worker program, control fd at 3)
//!     → supervisor.rs (one task per worker process)
//!         REGISTER → topology.rs insert (not ready) → STARTUP
//!         READY    → topology.rs mark ready → maybe post_master
//!         SOCKET_CLOSE → connection table remove
//!         exit     → drop record, destroy its connections, respawn
//! ```
//!
//! # Design Decisions
//! - Worker ids come from the master, monotonically increasing, never reused
//! - Readiness only moves forward; a restarted worker is a new record
//! - The router reads the ready subset, never mutates it

pub mod spawn;
pub mod supervisor;
pub mod topology;

use std::fmt;
use std::str::FromStr;

pub use spawn::{SpawnError, WorkerCommand};
pub use supervisor::Supervisor;
pub use topology::{Topology, WorkerRecord, WorkerSnapshot};

/// Identifier of one worker process incarnation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u32);

impl WorkerId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}
