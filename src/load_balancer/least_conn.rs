//! Least Connections load balancing strategy.

use crate::cluster::WorkerId;
use crate::load_balancer::LoadBalancer;
use crate::net::ConnectionTable;

/// Least connections selector.
/// Selects the ready worker with the fewest open ConnectionRecords.
#[derive(Debug, Default)]
pub struct LeastConnections;

impl LeastConnections {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastConnections {
    fn next_worker(&self, ready: &[WorkerId], connections: &ConnectionTable) -> Option<WorkerId> {
        let counts = connections.counts_by_worker();

        // Workers without records count as zero.
        // In case of tie, the first one is selected (stability)
        ready
            .iter()
            .copied()
            .min_by_key(|worker| counts.get(worker).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{ConnectionId, ConnectionRecord};

    fn open(table: &ConnectionTable, worker: WorkerId) -> ConnectionId {
        let id = ConnectionId::new();
        table.insert(ConnectionRecord::detached(id, "10.0.0.1".into(), worker));
        id
    }

    #[test]
    fn test_least_conn() {
        let lb = LeastConnections::new();
        let table = ConnectionTable::new();
        let (w1, w2) = (WorkerId::new(1), WorkerId::new(2));
        let ready = vec![w1, w2];

        // artificially load w1
        open(&table, w1);

        // Should pick w2 (0 connections)
        assert_eq!(lb.next_worker(&ready, &table), Some(w2));

        open(&table, w2);
        let extra = open(&table, w2); // now w2 has 2, w1 has 1

        assert_eq!(lb.next_worker(&ready, &table), Some(w1));

        table.remove(&extra);
        // tie at 1 each: first wins
        assert_eq!(lb.next_worker(&ready, &table), Some(w1));
    }

    #[test]
    fn ignores_load_on_workers_that_are_not_ready() {
        let lb = LeastConnections::new();
        let table = ConnectionTable::new();
        open(&table, WorkerId::new(9));
        open(&table, WorkerId::new(2));

        let ready = vec![WorkerId::new(2), WorkerId::new(4)];
        assert_eq!(lb.next_worker(&ready, &table), Some(WorkerId::new(4)));
    }
}
