//! Per-tree caches and ancestor-path invalidation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::RiskResult;
use crate::metrics::{NoopMetrics, SimulationMetrics};
use crate::node::NodeId;
use crate::tree::{RiskTree, TreeId};

use super::RiskResultCache;

/// Why cache entries were removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvalidationReason {
    /// A node's parameters changed; its ancestor path was cleared.
    NodeChanged { node_id: NodeId },
    /// Nodes were added, removed or moved; the whole tree was cleared.
    StructureChanged,
    TreeDeleted,
    ClearAll,
}

/// Notification sent to subscribers after entries are removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    pub tree_id: TreeId,
    pub reason: InvalidationReason,
    /// Ids removed, root first. Empty for whole-tree clears.
    pub cleared: Vec<NodeId>,
    /// Number of entries removed.
    pub count: usize,
    pub at: DateTime<Utc>,
}

/// Owns one [`RiskResultCache`] per tree.
///
/// Caches are created on first access. Invalidation events are delivered to
/// subscribers without blocking; slow or departed subscribers lose events.
pub struct TreeCacheManager {
    caches: DashMap<TreeId, Arc<RiskResultCache>>,
    subscribers: Mutex<Vec<Sender<InvalidationEvent>>>,
    dropped_events: AtomicU64,
    metrics: Arc<dyn SimulationMetrics>,
}

impl std::fmt::Debug for TreeCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeCacheManager")
            .field("trees", &self.caches.len())
            .field("dropped_events", &self.dropped_events())
            .finish_non_exhaustive()
    }
}

impl Default for TreeCacheManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeCacheManager {
    #[must_use]
    pub fn new() -> Self {
        Self::with_metrics(Arc::new(NoopMetrics))
    }

    #[must_use]
    pub fn with_metrics(metrics: Arc<dyn SimulationMetrics>) -> Self {
        Self {
            caches: DashMap::new(),
            subscribers: Mutex::new(Vec::new()),
            dropped_events: AtomicU64::new(0),
            metrics,
        }
    }

    /// The cache for `tree_id`, created if absent.
    pub fn cache_for(&self, tree_id: TreeId) -> Arc<RiskResultCache> {
        let entry = self
            .caches
            .entry(tree_id)
            .or_insert_with(|| Arc::new(RiskResultCache::new(tree_id)));
        Arc::clone(entry.value())
    }

    /// The cache for `tree_id`, if one exists.
    pub fn existing(&self, tree_id: TreeId) -> Option<Arc<RiskResultCache>> {
        self.caches.get(&tree_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes the cached outcomes on the path from the root to `node_id`.
    ///
    /// Returns the ids actually removed, root first. Siblings and their
    /// subtrees stay cached.
    ///
    /// # Errors
    ///
    /// `NodeNotFound` when `node_id` is not in `tree`'s index.
    pub fn invalidate(&self, tree: &RiskTree, node_id: &NodeId) -> RiskResult<Vec<NodeId>> {
        let path = tree.index.ancestor_path(node_id)?;
        let cleared = match self.existing(tree.id) {
            Some(cache) => cache.remove_all(path)?,
            None => Vec::new(),
        };

        info!(tree_id = %tree.id, node_id = %node_id, cleared = ?cleared, "invalidated ancestor path");
        self.metrics.on_invalidation(tree.id, &cleared);
        self.publish(
            tree.id,
            InvalidationReason::NodeChanged {
                node_id: node_id.clone(),
            },
            cleared.clone(),
            cleared.len(),
        );
        Ok(cleared)
    }

    /// Clears every entry of a tree whose structure changed.
    ///
    /// Returns the number of entries removed.
    pub fn on_tree_structure_changed(&self, tree_id: TreeId) -> RiskResult<usize> {
        let count = match self.existing(tree_id) {
            Some(cache) => cache.clear_and_count()?,
            None => 0,
        };
        info!(tree_id = %tree_id, count, "cleared tree cache after structure change");
        self.metrics.on_tree_cleared(tree_id, count);
        self.publish(tree_id, InvalidationReason::StructureChanged, Vec::new(), count);
        Ok(count)
    }

    /// Drops a tree's cache entirely. Returns the number of entries it held.
    pub fn delete_tree(&self, tree_id: TreeId) -> RiskResult<usize> {
        let count = match self.caches.remove(&tree_id) {
            Some((_, cache)) => cache.clear_and_count()?,
            None => 0,
        };
        info!(tree_id = %tree_id, count, "deleted tree cache");
        self.metrics.on_tree_cleared(tree_id, count);
        self.publish(tree_id, InvalidationReason::TreeDeleted, Vec::new(), count);
        Ok(count)
    }

    /// Empties every cache. Returns the total number of entries removed.
    pub fn clear_all(&self) -> RiskResult<usize> {
        let caches: Vec<Arc<RiskResultCache>> = self.caches.iter().map(|entry| Arc::clone(entry.value())).collect();
        let mut total = 0;
        for cache in caches {
            let count = cache.clear_and_count()?;
            total += count;
            self.metrics.on_tree_cleared(cache.tree_id(), count);
            self.publish(cache.tree_id(), InvalidationReason::ClearAll, Vec::new(), count);
        }
        info!(total, "cleared all tree caches");
        Ok(total)
    }

    /// Number of trees with a cache.
    #[must_use]
    pub fn tree_count(&self) -> usize {
        self.caches.len()
    }

    /// Opens a bounded stream of invalidation events.
    #[must_use]
    pub fn subscribe(&self, capacity: usize) -> Receiver<InvalidationEvent> {
        let (tx, rx) = bounded(capacity.max(1));
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    /// Events that could not be delivered.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    fn publish(&self, tree_id: TreeId, reason: InvalidationReason, cleared: Vec<NodeId>, count: usize) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        if subscribers.is_empty() {
            return;
        }
        let event = InvalidationEvent {
            tree_id,
            reason,
            cleared,
            count,
            at: Utc::now(),
        };
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped_events.fetch_add(1, Ordering::Relaxed);
                false
            }
        });
    }
}
