//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the dispatcher.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::path::PathBuf;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Root configuration for the dispatcher.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Listening socket owned by the master.
    pub listener: ListenerConfig,

    /// Worker process topology.
    pub cluster: ClusterConfig,

    /// Balancing and stickiness.
    pub routing: RoutingConfig,

    /// Waiting for ready workers.
    pub startup: StartupConfig,

    /// Teardown behaviour.
    pub shutdown: ShutdownConfig,

    /// How worker processes are launched.
    pub process: ProcessConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind (e.g., "0.0.0.0").
    pub host: String,

    /// Listening port. `0` lets the OS pick one.
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
        }
    }
}

impl ListenerConfig {
    /// `host:port` string suitable for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Worker topology configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Number of worker processes kept alive.
    pub workers: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Worker selection policy used when no sticky mapping applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    /// `connections routed so far mod ready workers`.
    #[default]
    RoundRobin,
    /// Uniformly random ready worker.
    Random,
    /// Ready worker with the fewest open connections.
    ActiveConnections,
}

impl std::str::FromStr for BalanceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            "active_connections" => Ok(Self::ActiveConnections),
            other => Err(format!("unknown balance strategy: {other}")),
        }
    }
}

/// Where the sticky key of a connection comes from.
///
/// In config files this is written as `sticky = false`, `sticky = true`
/// (remote address) or `sticky = "x-forwarded-for"` (header name).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StickySource {
    /// No stickiness; every connection is balanced.
    #[default]
    Disabled,
    /// Pin clients by their remote network address.
    RemoteAddress,
    /// Pin clients by the value of a request header (lowercase name).
    Header(String),
}

impl StickySource {
    /// Build a header source, normalising the name to lowercase.
    pub fn header(name: impl AsRef<str>) -> Self {
        Self::Header(name.as_ref().trim().to_ascii_lowercase())
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl Serialize for StickySource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Disabled => serializer.serialize_bool(false),
            Self::RemoteAddress => serializer.serialize_bool(true),
            Self::Header(name) => serializer.serialize_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for StickySource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StickyVisitor;

        impl Visitor<'_> for StickyVisitor {
            type Value = StickySource;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a boolean or a header name")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<StickySource, E> {
                Ok(if v {
                    StickySource::RemoteAddress
                } else {
                    StickySource::Disabled
                })
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<StickySource, E> {
                Ok(StickySource::header(v))
            }
        }

        deserializer.deserialize_any(StickyVisitor)
    }
}

/// Routing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Balancing strategy.
    pub balance: BalanceStrategy,

    /// Sticky key source.
    pub sticky: StickySource,

    /// Upper bound on bytes buffered while sniffing request headers.
    pub max_sniff_bytes: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            balance: BalanceStrategy::RoundRobin,
            sticky: StickySource::Disabled,
            max_sniff_bytes: 64 * 1024,
        }
    }
}

/// Bounded wait for a ready worker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Retries of worker selection before a connection is refused.
    pub wait_attempts: u32,

    /// Backoff between retries in milliseconds.
    pub wait_interval_ms: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            wait_attempts: 30,
            wait_interval_ms: 1000,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time workers get to exit after SIGTERM before they are SIGKILLed.
    pub kill_grace_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { kill_grace_ms: 5000 }
    }
}

/// Worker process launch settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProcessConfig {
    /// Program to execute for each worker. Defaults to the current executable.
    pub program: Option<PathBuf>,

    /// Arguments for the worker program. Defaults to the master's own arguments.
    pub args: Option<Vec<String>>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus endpoint on the master.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
