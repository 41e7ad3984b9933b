//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection (paused)
//!     → sticky key: header sniff (net::sniff) or remote address
//!     → router.rs (decision under one lock):
//!         sticky.rs mapping to a live worker, else load_balancer strategy
//!         → ConnectionRecord inserted
//!     → CONNECTION + prelude + socket handle on the worker's control channel
//!
//! No ready worker:
//!     → retry every wait_interval, up to wait_attempts
//!     → still none: connection destroyed (refused)
//! ```
//!
//! # Design Decisions
//! - A sticky key routes to the same worker for as long as that worker lives
//! - Stale sticky entries are dropped lazily, on the next lookup
//! - Selection and record insertion are atomic so active-connection counts stay exact

pub mod router;
pub mod sticky;

pub use router::{ConnectionRouter, RouterSettings};
pub use sticky::StickyTable;
