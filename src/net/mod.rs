//! Network layer subsystem (master side).
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, no reads yet)
//!     → sniff.rs (only when stickiness keys on a header)
//!     → routing (pick worker)
//!     → connection.rs (record kept until the worker reports SOCKET_CLOSE)
//! ```
//!
//! # Design Decisions
//! - The master never parses or answers HTTP; it only peeks at request heads
//! - Every byte the master reads travels to the worker as prelude
//! - Connection records hold a duplicate of the socket so shutdown can force-close it

pub mod connection;
pub mod listener;
pub mod sniff;

pub use connection::{ConnectionId, ConnectionRecord, ConnectionTable};
pub use listener::{Listener, ListenerError};
pub use sniff::{sniff_sticky_key, Sniffed};
