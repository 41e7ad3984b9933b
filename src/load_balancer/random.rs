//! Uniform random load balancing strategy.

use rand::Rng;

use crate::cluster::WorkerId;
use crate::load_balancer::LoadBalancer;
use crate::net::ConnectionTable;

/// Picks a uniformly random ready worker.
#[derive(Debug, Default)]
pub struct RandomChoice;

impl RandomChoice {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for RandomChoice {
    fn next_worker(&self, ready: &[WorkerId], _connections: &ConnectionTable) -> Option<WorkerId> {
        if ready.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..ready.len());
        Some(ready[index])
    }
}
