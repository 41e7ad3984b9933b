//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (PORT / CORES environment overrides)
//!     → CLI flags (binary only)
//!     → validation.rs (semantic checks)
//!     → DispatcherConfig (validated, immutable)
//!     → shared via Arc by the router and the supervisor
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the dispatcher starts
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::BalanceStrategy;
pub use schema::DispatcherConfig;
pub use schema::ListenerConfig;
pub use schema::ObservabilityConfig;
pub use schema::StickySource;
