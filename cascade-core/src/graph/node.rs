//! Graph Nodes
//!
//! This module defines the per-node state stored in a state graph.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::notify::{Notifier, Subscription};

/// Unique identifier for a node.
///
/// IDs are unique across all graphs in the process, which also makes them a
/// stable global order for acquiring two node locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    ///
    /// Stable for the life of the process; suitable as an external key or a
    /// log field.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// How a node picks between its own value and its parents' values.
///
/// An absent value orders below every present value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Prefer the larger value.
    #[default]
    Ascending,

    /// Prefer the smaller value.
    ///
    /// An absent value is the smallest, so a node with no local value always
    /// evaluates to `None`. Seed a "worst of my inputs" node with the best
    /// possible value instead of leaving it empty.
    Descending,
}

impl Strategy {
    /// Pick the preferred of two values. Ties keep `current`.
    pub fn prefer<T: Ord>(self, current: Option<T>, candidate: Option<T>) -> Option<T> {
        let take = match self {
            Strategy::Ascending => candidate > current,
            Strategy::Descending => candidate < current,
        };
        if take {
            candidate
        } else {
            current
        }
    }
}

/// Mutable state of one node. Guarded by the node's own lock.
pub(crate) struct NodeState<T> {
    pub(crate) local: Option<T>,
    pub(crate) strategy: Strategy,

    /// Effective value as last announced.
    pub(crate) observed: Option<T>,

    /// Parents, each with the subscription to that parent's announcements.
    pub(crate) parents: IndexMap<NodeId, Subscription>,

    pub(crate) children: IndexSet<NodeId>,

    /// Set once the node is being removed. No new edges may reach it.
    pub(crate) removed: bool,
}

impl<T: Clone> NodeState<T> {
    fn new(strategy: Strategy, local: Option<T>) -> Self {
        Self {
            observed: local.clone(),
            local,
            strategy,
            parents: IndexMap::new(),
            children: IndexSet::new(),
            removed: false,
        }
    }
}

/// A node as stored in the arena.
pub(crate) struct NodeSlot<T> {
    pub(crate) id: NodeId,
    pub(crate) state: Mutex<NodeState<T>>,
    pub(crate) notifier: Notifier,

    /// Held while the effective value is recomputed and recorded.
    pub(crate) refresh: Mutex<()>,
}

impl<T: Clone> NodeSlot<T> {
    pub(crate) fn new(strategy: Strategy, local: Option<T>) -> Self {
        Self {
            id: NodeId::new(),
            state: Mutex::new(NodeState::new(strategy, local)),
            notifier: Notifier::new(),
            refresh: Mutex::new(()),
        }
    }
}

/// Lock two distinct nodes in ascending ID order. Guards are returned in
/// argument order.
pub(crate) fn lock_pair<'a, T>(
    a: &'a NodeSlot<T>,
    b: &'a NodeSlot<T>,
) -> (MutexGuard<'a, NodeState<T>>, MutexGuard<'a, NodeState<T>>) {
    debug_assert_ne!(a.id, b.id);

    if a.id < b.id {
        let first = a.state.lock();
        let second = b.state.lock();
        (first, second)
    } else {
        let first = b.state.lock();
        let second = a.state.lock();
        (second, first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique_and_ordered() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
        assert!(id1 < id2);
        assert_eq!(id1.to_string(), format!("n{}", id1.raw()));
    }

    #[test]
    fn ascending_prefers_larger() {
        let s = Strategy::Ascending;
        assert_eq!(s.prefer(Some(2), Some(9)), Some(9));
        assert_eq!(s.prefer(Some(9), Some(2)), Some(9));
        assert_eq!(s.prefer(None, Some(1)), Some(1));
        assert_eq!(s.prefer(Some(1), None), Some(1));
    }

    #[test]
    fn descending_prefers_smaller() {
        let s = Strategy::Descending;
        assert_eq!(s.prefer(Some(2), Some(9)), Some(2));
        assert_eq!(s.prefer(Some(9), Some(2)), Some(2));
        // Absent orders below everything, so it wins a descending fold.
        assert_eq!(s.prefer(Some(1), None::<i32>), None);
    }

    #[test]
    fn new_slot_observes_its_local_value() {
        let slot = NodeSlot::new(Strategy::Ascending, Some(4));
        let state = slot.state.lock();
        assert_eq!(state.observed, Some(4));
        assert!(state.parents.is_empty());
        assert!(state.children.is_empty());
        assert!(!state.removed);
    }

    #[test]
    fn lock_pair_returns_guards_in_argument_order() {
        let low = NodeSlot::new(Strategy::Ascending, Some(1));
        let high = NodeSlot::new(Strategy::Ascending, Some(2));

        let (a, b) = lock_pair(&high, &low);
        assert_eq!((a.local, b.local), (Some(2), Some(1)));
    }
}
