//! Outcome storage for a single tree.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::ExecutionError;
use crate::node::NodeId;
use crate::outcome::Outcome;
use crate::tree::TreeId;

fn lock_err(context: &'static str) -> ExecutionError {
    ExecutionError::Cache {
        message: format!("result cache lock poisoned ({context})"),
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<NodeId, Arc<Outcome>>,
    /// Advanced by every removal or clear.
    epoch: u64,
    /// Epoch of the last whole-cache clear.
    cleared_at: u64,
    /// Epoch at which each id was last removed, present or not.
    removed_at: HashMap<NodeId, u64>,
}

impl CacheState {
    fn stamp(&mut self, ids: &[NodeId]) {
        self.epoch += 1;
        for id in ids {
            self.removed_at.insert(id.clone(), self.epoch);
        }
    }

    fn is_stale(&self, id: &NodeId, epoch: u64) -> bool {
        self.cleared_at > epoch || self.removed_at.get(id).is_some_and(|at| *at > epoch)
    }
}

/// Key-value store of outcomes for one tree.
///
/// Entries never expire; they leave only through removal or clearing. Locks
/// are held for single map operations, never across simulation work.
#[derive(Debug)]
pub struct RiskResultCache {
    tree_id: TreeId,
    state: RwLock<CacheState>,
}

impl RiskResultCache {
    #[must_use]
    pub fn new(tree_id: TreeId) -> Self {
        Self {
            tree_id,
            state: RwLock::new(CacheState::default()),
        }
    }

    #[must_use]
    pub const fn tree_id(&self) -> TreeId {
        self.tree_id
    }

    /// Cached outcome for `id`, if any.
    pub fn get(&self, id: &NodeId) -> Result<Option<Arc<Outcome>>, ExecutionError> {
        let state = self.state.read().map_err(|_| lock_err("get"))?;
        Ok(state.entries.get(id).cloned())
    }

    /// Stores an outcome, returning the one it replaced.
    pub fn put(&self, id: NodeId, outcome: Arc<Outcome>) -> Result<Option<Arc<Outcome>>, ExecutionError> {
        let mut state = self.state.write().map_err(|_| lock_err("put"))?;
        Ok(state.entries.insert(id, outcome))
    }

    /// Stores an outcome unless `id` was removed, or the cache cleared,
    /// after `epoch` was read.
    ///
    /// Removals of other ids do not block the write. Returns whether the
    /// outcome was stored.
    pub fn put_if_current(&self, id: NodeId, outcome: Arc<Outcome>, epoch: u64) -> Result<bool, ExecutionError> {
        let mut state = self.state.write().map_err(|_| lock_err("put_if_current"))?;
        if state.is_stale(&id, epoch) {
            return Ok(false);
        }
        state.entries.insert(id, outcome);
        Ok(true)
    }

    /// Current removal epoch.
    pub fn epoch(&self) -> Result<u64, ExecutionError> {
        let state = self.state.read().map_err(|_| lock_err("epoch"))?;
        Ok(state.epoch)
    }

    /// Removes `id`, returning its outcome if it was cached.
    pub fn remove(&self, id: &NodeId) -> Result<Option<Arc<Outcome>>, ExecutionError> {
        let mut state = self.state.write().map_err(|_| lock_err("remove"))?;
        state.stamp(std::slice::from_ref(id));
        Ok(state.entries.remove(id))
    }

    /// Removes every id in `ids` under one lock.
    ///
    /// Every id is marked removed, cached or not, so an outcome for it that is
    /// still being computed will not be stored. Returns the ids that were
    /// present, in the order given.
    pub fn remove_all(&self, ids: &[NodeId]) -> Result<Vec<NodeId>, ExecutionError> {
        let mut state = self.state.write().map_err(|_| lock_err("remove_all"))?;
        state.stamp(ids);
        Ok(ids
            .iter()
            .filter(|id| state.entries.remove(*id).is_some())
            .cloned()
            .collect())
    }

    pub fn clear(&self) -> Result<(), ExecutionError> {
        self.clear_and_count().map(|_| ())
    }

    /// Clears the cache and returns how many entries it held, atomically.
    pub fn clear_and_count(&self) -> Result<usize, ExecutionError> {
        let mut state = self.state.write().map_err(|_| lock_err("clear"))?;
        state.epoch += 1;
        state.cleared_at = state.epoch;
        state.removed_at.clear();
        let count = state.entries.len();
        state.entries.clear();
        Ok(count)
    }

    pub fn size(&self) -> Result<usize, ExecutionError> {
        let state = self.state.read().map_err(|_| lock_err("size"))?;
        Ok(state.entries.len())
    }

    pub fn contains(&self, id: &NodeId) -> Result<bool, ExecutionError> {
        let state = self.state.read().map_err(|_| lock_err("contains"))?;
        Ok(state.entries.contains_key(id))
    }

    /// Cached ids, sorted.
    pub fn keys(&self) -> Result<Vec<NodeId>, ExecutionError> {
        let state = self.state.read().map_err(|_| lock_err("keys"))?;
        let mut keys: Vec<NodeId> = state.entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> NodeId {
        NodeId::new(s).unwrap()
    }

    fn outcome(loss: u64) -> Arc<Outcome> {
        Arc::new(Outcome::from_losses(10, [(0, loss)]).unwrap())
    }

    #[test]
    fn put_get_remove() {
        let cache = RiskResultCache::new(TreeId::new());
        assert!(cache.get(&id("a")).unwrap().is_none());
        assert!(cache.put(id("a"), outcome(1)).unwrap().is_none());
        assert!(cache.put(id("a"), outcome(2)).unwrap().is_some());
        assert_eq!(cache.get(&id("a")).unwrap().unwrap().loss(0), 2);
        assert!(cache.contains(&id("a")).unwrap());
        assert!(cache.remove(&id("a")).unwrap().is_some());
        assert_eq!(cache.size().unwrap(), 0);
    }

    #[test]
    fn remove_all_reports_present_ids_in_order() {
        let cache = RiskResultCache::new(TreeId::new());
        cache.put(id("root"), outcome(1)).unwrap();
        cache.put(id("leaf"), outcome(1)).unwrap();
        cache.put(id("other"), outcome(1)).unwrap();
        let removed = cache.remove_all(&[id("root"), id("mid"), id("leaf")]).unwrap();
        assert_eq!(removed, vec![id("root"), id("leaf")]);
        assert_eq!(cache.keys().unwrap(), vec![id("other")]);
    }

    #[test]
    fn clear_and_count_empties_cache() {
        let cache = RiskResultCache::new(TreeId::new());
        cache.put(id("a"), outcome(1)).unwrap();
        cache.put(id("b"), outcome(1)).unwrap();
        assert_eq!(cache.clear_and_count().unwrap(), 2);
        assert_eq!(cache.clear_and_count().unwrap(), 0);
    }

    #[test]
    fn stale_writes_are_skipped_after_removal() {
        let cache = RiskResultCache::new(TreeId::new());
        let epoch = cache.epoch().unwrap();
        assert!(cache.put_if_current(id("a"), outcome(1), epoch).unwrap());
        cache.remove(&id("a")).unwrap();
        assert!(!cache.put_if_current(id("a"), outcome(2), epoch).unwrap());
        assert!(!cache.contains(&id("a")).unwrap());
    }

    #[test]
    fn removing_one_path_does_not_block_other_writes() {
        let cache = RiskResultCache::new(TreeId::new());
        let epoch = cache.epoch().unwrap();
        let cleared = cache.remove_all(&[id("root"), id("ops"), id("hardware")]).unwrap();
        assert!(cleared.is_empty());

        assert!(cache.put_if_current(id("cyber"), outcome(1), epoch).unwrap());
        // Nothing was cached for hardware, but a write racing its removal is still stale.
        assert!(!cache.put_if_current(id("hardware"), outcome(1), epoch).unwrap());
        assert!(!cache.put_if_current(id("root"), outcome(1), epoch).unwrap());

        let fresh = cache.epoch().unwrap();
        assert!(cache.put_if_current(id("hardware"), outcome(2), fresh).unwrap());
    }

    #[test]
    fn clear_makes_every_pending_write_stale() {
        let cache = RiskResultCache::new(TreeId::new());
        let epoch = cache.epoch().unwrap();
        cache.clear().unwrap();
        assert!(!cache.put_if_current(id("anything"), outcome(1), epoch).unwrap());
        let fresh = cache.epoch().unwrap();
        assert!(cache.put_if_current(id("anything"), outcome(1), fresh).unwrap());
    }
}
