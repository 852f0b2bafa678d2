//! The active routing table.
//!
//! # Responsibilities
//! - Hold exactly one ordered list of compiled targets
//! - Hand out immutable snapshots to dispatches
//! - Swap in a new list atomically
//!
//! # Design Decisions
//! - Replace-only: a table is never edited in place
//! - Readers never take a lock; a snapshot stays valid while a new table is installed

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::routing::target::Target;

/// Immutable view of the table at one point in time.
pub type TableSnapshot = Arc<Vec<Target>>;

#[derive(Debug)]
pub struct RoutingTable {
    active: ArcSwap<Vec<Target>>,
}

impl RoutingTable {
    /// An empty table; nothing matches until targets are installed.
    pub fn new() -> Self {
        Self {
            active: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> TableSnapshot {
        self.active.load_full()
    }

    /// Install `targets` as the only active table, returning the previous one.
    pub fn replace(&self, targets: Vec<Target>) -> TableSnapshot {
        self.active.swap(Arc::new(targets))
    }

    pub fn len(&self) -> usize {
        self.active.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::target::{compile_targets, TargetConfig};

    fn targets(ids: &[&str]) -> Vec<Target> {
        compile_targets(
            ids.iter()
                .map(|id| TargetConfig::new(*id, ".*", "http://localhost"))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn starts_empty() {
        assert!(RoutingTable::new().is_empty());
    }

    #[test]
    fn snapshot_survives_replace() {
        let table = RoutingTable::new();
        table.replace(targets(&["a", "b"]));
        let before = table.snapshot();

        let previous = table.replace(targets(&["c"]));

        assert_eq!(before.len(), 2);
        assert!(Arc::ptr_eq(&before, &previous));
        let ids: Vec<_> = table.snapshot().iter().map(|t| t.id().to_string()).collect();
        assert_eq!(ids, vec!["c"]);
    }
}
