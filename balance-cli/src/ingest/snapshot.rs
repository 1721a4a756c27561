//! Published snapshots, one per dataset
//!
//! The whole map is swapped by reference on publish, so readers take a cheap
//! `load` and never see a half-built overview.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::balance::BalanceOverview;

type SnapshotMap = HashMap<String, Arc<BalanceOverview>>;

#[derive(Debug)]
pub struct SnapshotStore {
    published: ArcSwap<SnapshotMap>,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        SnapshotStore {
            published: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Current snapshot of a dataset, `None` if it never ingested successfully
    pub fn get(&self, dataset_id: &str) -> Option<Arc<BalanceOverview>> {
        self.published.load().get(dataset_id).cloned()
    }

    /// Replace a dataset's snapshot; returns the one it superseded
    pub fn publish(&self, overview: BalanceOverview) -> Option<Arc<BalanceOverview>> {
        let dataset_id = overview.dataset_id.clone();
        let overview = Arc::new(overview);
        let previous = self.published.rcu(|current| {
            let mut next = SnapshotMap::clone(current);
            next.insert(dataset_id.clone(), overview.clone());
            next
        });
        log::info!(
            "Published snapshot for dataset '{}' ({} energy points, {} sales points)",
            dataset_id,
            overview.energy.len(),
            overview.sales.len()
        );
        previous.get(&dataset_id).cloned()
    }

    pub fn datasets(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.published.load().keys().cloned().collect();
        ids.sort();
        ids
    }
}
