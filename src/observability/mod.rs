//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, worker span per process)
//!     → metrics.rs (counters and gauges, master only)
//!
//! Consumers:
//!     → stdout (master and workers share the terminal)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Every worker log line carries its worker id via a span
//! - Metrics are cheap (atomic increments) and no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
