//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::cluster::WorkerId;
use crate::load_balancer::LoadBalancer;
use crate::net::ConnectionTable;

/// Round-robin selector.
/// Stores an internal counter of connections routed so far, sticky ones
/// included; connection `i` goes to ready worker `i mod len`.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_worker(&self, ready: &[WorkerId], _connections: &ConnectionTable) -> Option<WorkerId> {
        if ready.is_empty() {
            return None;
        }

        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(ready[count % ready.len()])
    }

    fn note_sticky_route(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }
}
