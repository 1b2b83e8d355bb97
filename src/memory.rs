//! In-process token -> snapshot map. No eviction of its own: the stash decides
//! when an entry goes away (restore, clear, clear_all).

use dashmap::DashMap;
use std::sync::Arc;

use crate::snapshot::Snapshot;

#[derive(Default)]
pub struct MemoryStore {
    map: DashMap<String, Arc<Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, token: &str, snap: Arc<Snapshot>) {
        self.map.insert(token.to_string(), snap);
    }

    pub fn contains(&self, token: &str) -> bool {
        self.map.contains_key(token)
    }

    /// True if `token` still maps to exactly this snapshot instance.
    pub fn holds(&self, token: &str, snap: &Arc<Snapshot>) -> bool {
        self.map
            .get(token)
            .map(|e| Arc::ptr_eq(e.value(), snap))
            .unwrap_or(false)
    }

    pub fn remove(&self, token: &str) -> Option<Arc<Snapshot>> {
        self.map.remove(token).map(|(_, v)| v)
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    pub fn tokens(&self) -> Vec<String> {
        self.map.iter().map(|e| e.key().clone()).collect()
    }

    /// Point-in-time copy of all entries.
    pub fn entries(&self) -> Vec<(String, Arc<Snapshot>)> {
        self.map
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}
