//! Latest-value snapshot stores keyed by server id.
//!
//! Every store follows the same contract: `set` swaps the whole entry under
//! the write lock, `get` clones an `Arc` under the read lock. Readers never
//! block each other and a writer holds the lock only for the swap. There are
//! no cross-store transactions.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::geo::BoundingBox;
use crate::models::{RealtimeSnapshot, StaticSnapshot};

#[derive(Debug)]
pub struct SnapshotStore<V> {
    entries: RwLock<HashMap<u32, Arc<V>>>,
}

impl<V> Default for SnapshotStore<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> SnapshotStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entry for `server_id` wholesale.
    pub fn set(&self, server_id: u32, value: V) {
        let value = Arc::new(value);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(server_id, value);
    }

    pub fn get(&self, server_id: u32) -> Option<Arc<V>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&server_id).cloned()
    }

    pub fn remove(&self, server_id: u32) -> Option<Arc<V>> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&server_id)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type StaticStore = SnapshotStore<StaticSnapshot>;
pub type RealtimeStore = SnapshotStore<RealtimeSnapshot>;
pub type BoundingBoxStore = SnapshotStore<BoundingBox>;
