//! Handoff protocol subsystem.
//!
//! # Data Flow
//! ```text
//! worker                              master
//!   │ ── REGISTER ───────────────────▶ │  worker known, not ready
//!   │ ◀──────────────────── STARTUP ── │
//!   │   (runs server factory, binds)   │
//!   │ ── READY ──────────────────────▶ │  worker selectable; maybe post_master
//!   │ ◀── CONNECTION + socket handle ─ │  per routed connection
//!   │ ── SOCKET_CLOSE ───────────────▶ │  ConnectionRecord dropped
//! ```
//!
//! # Design Decisions
//! - One datagram per message (`SOCK_SEQPACKET`), no stream reassembly
//! - Small JSON header, raw prelude bytes, descriptor as ancillary data
//! - A worker never receives CONNECTION before it has sent READY

pub mod channel;
pub mod message;

use thiserror::Error;

pub use channel::{ControlChannel, Received};
pub use message::ControlMessage;

/// Errors on the control channel.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("control header could not be (de)serialized: {0}")]
    Json(#[from] serde_json::Error),

    #[error("control frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),

    #[error("malformed control frame: {0}")]
    Malformed(&'static str),

    #[error("socket handle attached to a {0} message")]
    UnexpectedHandle(&'static str),
}
