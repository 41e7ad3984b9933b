//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Connection needs a worker (no live sticky mapping)
//!     → ready worker ids, sorted ascending
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through workers)
//!         - random.rs (uniform pick)
//!         - least_conn.rs (pick worker with fewest open connections)
//!     → Return worker id, or None when nobody is ready
//! ```
//!
//! # Design Decisions
//! - Strategies only see ready workers; readiness is filtered by the topology
//! - Algorithm chosen once from configuration and never changes at runtime
//! - Load is read from the master's connection table at decision time
//! - Sticky routes still count as routed connections for round-robin

pub mod least_conn;
pub mod random;
pub mod round_robin;

use crate::cluster::WorkerId;
use crate::config::BalanceStrategy;
use crate::net::ConnectionTable;

pub use least_conn::LeastConnections;
pub use random::RandomChoice;
pub use round_robin::RoundRobin;

/// Trait for load balancing strategies.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Select a worker from `ready` (sorted by id). `None` only if `ready` is empty.
    fn next_worker(&self, ready: &[WorkerId], connections: &ConnectionTable) -> Option<WorkerId>;

    /// A connection was routed by its sticky mapping without asking the balancer.
    fn note_sticky_route(&self) {}
}

/// Build the balancer for a configured strategy.
pub fn build(strategy: BalanceStrategy) -> Box<dyn LoadBalancer> {
    match strategy {
        BalanceStrategy::RoundRobin => Box::new(RoundRobin::new()),
        BalanceStrategy::Random => Box::new(RandomChoice::new()),
        BalanceStrategy::ActiveConnections => Box::new(LeastConnections::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_strategy_refuses_empty_set() {
        let connections = ConnectionTable::new();
        for strategy in [
            BalanceStrategy::RoundRobin,
            BalanceStrategy::Random,
            BalanceStrategy::ActiveConnections,
        ] {
            assert_eq!(build(strategy).next_worker(&[], &connections), None);
        }
    }
}
