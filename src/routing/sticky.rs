//! StickyAddressTable: sticky key → worker id.

use dashmap::DashMap;

use crate::cluster::WorkerId;

/// Mapping from sticky key to the worker that first served it.
///
/// Entries never expire on their own; they are removed when the router finds
/// the mapped worker gone.
#[derive(Debug, Default)]
pub struct StickyTable {
    entries: DashMap<String, WorkerId>,
}

impl StickyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &str) -> Option<WorkerId> {
        self.entries.get(key).map(|entry| *entry)
    }

    pub fn assign(&self, key: &str, worker: WorkerId) {
        self.entries.insert(key.to_string(), worker);
    }

    pub fn forget(&self, key: &str) -> Option<WorkerId> {
        self.entries.remove(key).map(|(_, worker)| worker)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_lookup_forget() {
        let table = StickyTable::new();
        assert_eq!(table.lookup("10.0.0.1"), None);

        table.assign("10.0.0.1", WorkerId::new(2));
        table.assign("10.0.0.2", WorkerId::new(1));
        assert_eq!(table.lookup("10.0.0.1"), Some(WorkerId::new(2)));
        assert_eq!(table.len(), 2);

        assert_eq!(table.forget("10.0.0.1"), Some(WorkerId::new(2)));
        assert_eq!(table.lookup("10.0.0.1"), None);
        assert_eq!(table.forget("10.0.0.1"), None);
    }
}
