//! State Graph
//!
//! A [`StateGraph`] owns its nodes; [`StateNode`] is a cheap handle to one of
//! them. Edges are stored as node IDs on both ends, so removing a node or an
//! edge never leaves an owning reference behind.
//!
//! # Algorithm
//!
//! Reading a node's value folds its own local value with the values of its
//! direct parents, each of which folds its own parents in turn:
//!
//! 1. Start with the node's local value.
//! 2. For each parent, read the parent's value (recursively).
//! 3. Keep whichever value the node's [`Strategy`] prefers.
//!
//! Changes are pushed one hop at a time. Linking a parent subscribes the
//! child to the parent's "Value" announcements; when one arrives, the child
//! recomputes and announces its own "Value" if the result moved.
//!
//! # Locking
//!
//! Each node has its own lock. Linking or unlinking two nodes locks both in
//! ID order. Value reads and announcements hold at most one node lock at a
//! time and never while calling listeners.
//!
//! A separate per-node refresh lock spans recomputing and recording a node's
//! value. A node being removed is flagged under its own lock first, and
//! `link` refuses flagged endpoints.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::node::{lock_pair, NodeId, NodeSlot, Strategy};
use crate::config::{CycleDetection, GraphConfig};
use crate::error::GraphError;
use crate::notify::{PropertyEvent, Subscription};

/// Name announced when a node's effective value changes.
pub const VALUE: &str = "Value";

type ParentIds = SmallVec<[NodeId; 4]>;

struct GraphInner<T> {
    nodes: DashMap<NodeId, Arc<NodeSlot<T>>>,
    config: GraphConfig,

    /// Serializes edge changes while cycle checks walk the graph.
    topology: Mutex<()>,
}

/// Arena of aggregated-state nodes.
pub struct StateGraph<T> {
    inner: Arc<GraphInner<T>>,
}

/// Handle to a node of a [`StateGraph`].
pub struct StateNode<T> {
    id: NodeId,
    graph: Arc<GraphInner<T>>,
}

impl<T> StateGraph<T>
where
    T: Ord + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_config(GraphConfig::default())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                nodes: DashMap::new(),
                config,
                topology: Mutex::new(()),
            }),
        }
    }

    /// Create a node with no local value.
    ///
    /// A [`Strategy::Descending`] node created this way evaluates to `None`
    /// whatever its parents hold; use [`create_with`](Self::create_with) to
    /// seed it.
    pub fn create(&self, strategy: Strategy) -> StateNode<T> {
        self.insert(NodeSlot::new(strategy, None))
    }

    /// Create a node with a local value.
    pub fn create_with(&self, strategy: Strategy, value: T) -> StateNode<T> {
        self.insert(NodeSlot::new(strategy, Some(value)))
    }

    fn insert(&self, slot: NodeSlot<T>) -> StateNode<T> {
        let id = slot.id;
        self.inner.nodes.insert(id, Arc::new(slot));
        trace!(node = %id, "created state node");

        StateNode {
            id,
            graph: Arc::clone(&self.inner),
        }
    }

    /// Remove a node, unlinking it from all parents and children first.
    ///
    /// The node stops accepting new edges before its existing ones are
    /// cleared, so a concurrent `add_parent` either lands before and is
    /// cleared, or fails with [`GraphError::UnknownNode`].
    pub fn remove(&self, node: &StateNode<T>) -> Result<(), GraphError> {
        self.inner.check_owner(node)?;

        let slot = self.inner.slot(node.id)?;
        {
            let mut state = slot.state.lock();
            if state.removed {
                return Err(GraphError::UnknownNode(node.id));
            }
            state.removed = true;
        }

        self.inner.clear_parents(node.id)?;
        self.inner.clear_children(node.id)?;
        self.inner.nodes.remove(&node.id);
        debug!(node = %node.id, "removed state node");
        Ok(())
    }

    /// Look up a node by ID.
    pub fn node(&self, id: NodeId) -> Option<StateNode<T>> {
        self.inner.nodes.contains_key(&id).then(|| StateNode {
            id,
            graph: Arc::clone(&self.inner),
        })
    }

    pub fn contains(&self, node: &StateNode<T>) -> bool {
        Arc::ptr_eq(&self.inner, &node.graph) && self.inner.nodes.contains_key(&node.id)
    }

    /// Get the total number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.nodes.is_empty()
    }

    pub fn config(&self) -> GraphConfig {
        self.inner.config
    }
}

impl<T> Default for StateGraph<T>
where
    T: Ord + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for StateGraph<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for StateGraph<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateGraph")
            .field("node_count", &self.inner.nodes.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl<T> StateNode<T>
where
    T: Ord + Clone + Send + Sync + 'static,
{
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Make `other` a parent of this node.
    ///
    /// Returns `Ok(false)` if it already was one. On success this node
    /// announces its value.
    pub fn add_parent(&self, other: &StateNode<T>) -> Result<bool, GraphError> {
        self.graph.check_owner(other)?;
        self.graph.link(self.id, other.id, self.id)
    }

    /// Make `other` a child of this node.
    pub fn add_child(&self, other: &StateNode<T>) -> Result<bool, GraphError> {
        self.graph.check_owner(other)?;
        self.graph.link(other.id, self.id, self.id)
    }

    /// Returns `Ok(false)` if `other` was not a parent.
    pub fn remove_parent(&self, other: &StateNode<T>) -> Result<bool, GraphError> {
        self.graph.check_owner(other)?;
        self.graph.unlink(self.id, other.id)
    }

    pub fn remove_child(&self, other: &StateNode<T>) -> Result<bool, GraphError> {
        self.graph.check_owner(other)?;
        self.graph.unlink(other.id, self.id)
    }

    pub fn clear_parents(&self) -> Result<(), GraphError> {
        self.graph.clear_parents(self.id)
    }

    pub fn clear_children(&self) -> Result<(), GraphError> {
        self.graph.clear_children(self.id)
    }

    /// Remove every edge of this node.
    pub fn clear(&self) -> Result<(), GraphError> {
        self.clear_parents()?;
        self.clear_children()
    }

    /// Effective value: the local value folded with all parents' values.
    pub fn value(&self) -> Result<Option<T>, GraphError> {
        let slot = self.graph.slot(self.id)?;
        Ok(self.graph.fold(&slot))
    }

    pub fn local_value(&self) -> Result<Option<T>, GraphError> {
        Ok(self.graph.slot(self.id)?.state.lock().local.clone())
    }

    /// Set the local value. Parents are not touched. Announces "Value" if
    /// the effective value changed.
    pub fn set_value(&self, value: impl Into<Option<T>>) -> Result<(), GraphError> {
        let slot = self.graph.slot(self.id)?;
        slot.state.lock().local = value.into();
        self.graph.refresh(self.id, false);
        Ok(())
    }

    pub fn strategy(&self) -> Result<Strategy, GraphError> {
        Ok(self.graph.slot(self.id)?.state.lock().strategy)
    }

    /// Change the strategy. Announces "Value" if the effective value changed.
    pub fn set_strategy(&self, strategy: Strategy) -> Result<(), GraphError> {
        let slot = self.graph.slot(self.id)?;
        slot.state.lock().strategy = strategy;
        self.graph.refresh(self.id, false);
        Ok(())
    }

    pub fn parents(&self) -> Result<Vec<StateNode<T>>, GraphError> {
        let slot = self.graph.slot(self.id)?;
        let ids: ParentIds = slot.state.lock().parents.keys().copied().collect();
        Ok(ids.into_iter().map(|id| self.sibling(id)).collect())
    }

    pub fn children(&self) -> Result<Vec<StateNode<T>>, GraphError> {
        let slot = self.graph.slot(self.id)?;
        let ids: ParentIds = slot.state.lock().children.iter().copied().collect();
        Ok(ids.into_iter().map(|id| self.sibling(id)).collect())
    }

    pub fn has_parent(&self, other: &StateNode<T>) -> bool {
        self.graph
            .slot(self.id)
            .is_ok_and(|slot| {
                let state = slot.state.lock();
                state.parents.contains_key(&other.id)
            })
    }

    pub fn has_child(&self, other: &StateNode<T>) -> bool {
        self.graph
            .slot(self.id)
            .is_ok_and(|slot| {
                let state = slot.state.lock();
                state.children.contains(&other.id)
            })
    }

    /// Listen to this node's "Value" announcements.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, listener: F) -> Result<Subscription, GraphError>
    where
        F: Fn(PropertyEvent<'_>) + Send + Sync + 'static,
    {
        Ok(self.graph.slot(self.id)?.notifier.subscribe(listener))
    }

    /// Number of listeners on this node, including child nodes.
    pub fn subscriber_count(&self) -> Result<usize, GraphError> {
        Ok(self.graph.slot(self.id)?.notifier.subscriber_count())
    }

    fn sibling(&self, id: NodeId) -> StateNode<T> {
        StateNode {
            id,
            graph: Arc::clone(&self.graph),
        }
    }
}

impl<T> Clone for StateNode<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            graph: Arc::clone(&self.graph),
        }
    }
}

impl<T> PartialEq for StateNode<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.graph, &other.graph)
    }
}

impl<T> Eq for StateNode<T> {}

impl<T> Hash for StateNode<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for StateNode<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateNode").field(&self.id).finish()
    }
}

impl<T> GraphInner<T>
where
    T: Ord + Clone + Send + Sync + 'static,
{
    fn slot(&self, id: NodeId) -> Result<Arc<NodeSlot<T>>, GraphError> {
        self.nodes
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(GraphError::UnknownNode(id))
    }

    fn check_owner(self: &Arc<Self>, node: &StateNode<T>) -> Result<(), GraphError> {
        if Arc::ptr_eq(self, &node.graph) {
            Ok(())
        } else {
            Err(GraphError::ForeignNode(node.id))
        }
    }

    /// Add the edge `parent -> child` on behalf of `requester`.
    fn link(
        self: &Arc<Self>,
        child: NodeId,
        parent: NodeId,
        requester: NodeId,
    ) -> Result<bool, GraphError> {
        if child == parent {
            return Err(GraphError::SelfReference(child));
        }

        let child_slot = self.slot(child)?;
        let parent_slot = self.slot(parent)?;

        {
            let _topology = self.topology_guard();

            if self.config.cycle_detection == CycleDetection::Transitive {
                if child_slot.state.lock().children.contains(&parent) {
                    return Err(conflict(child, parent, requester));
                }
                if self.is_ancestor(child, parent) {
                    return Err(GraphError::Cycle { parent, child });
                }
            }

            let (mut child_state, mut parent_state) = lock_pair(&child_slot, &parent_slot);

            if child_state.removed {
                return Err(GraphError::UnknownNode(child));
            }
            if parent_state.removed {
                return Err(GraphError::UnknownNode(parent));
            }

            if child_state.parents.contains_key(&parent) {
                return Ok(false);
            }

            if child_state.children.contains(&parent) {
                return Err(conflict(child, parent, requester));
            }

            let graph = Arc::downgrade(self);
            let subscription = parent_slot.notifier.subscribe(move |event| {
                if event.is_changed(VALUE) {
                    Self::on_parent_changed(&graph, child);
                }
            });

            child_state.parents.insert(parent, subscription);
            parent_state.children.insert(child);
        }

        debug!(%parent, %child, "linked state nodes");
        self.refresh(child, true);
        Ok(true)
    }

    /// Remove the edge `parent -> child` together with its subscription.
    fn unlink(&self, child: NodeId, parent: NodeId) -> Result<bool, GraphError> {
        if child == parent {
            return Ok(false);
        }

        let child_slot = self.slot(child)?;
        let parent_slot = self.slot(parent)?;

        let subscription = {
            let _topology = self.topology_guard();
            let (mut child_state, mut parent_state) = lock_pair(&child_slot, &parent_slot);
            let subscription = child_state.parents.shift_remove(&parent);
            if subscription.is_some() {
                parent_state.children.shift_remove(&child);
            }
            subscription
        };

        let Some(subscription) = subscription else {
            return Ok(false);
        };
        drop(subscription);

        debug!(%parent, %child, "unlinked state nodes");
        self.refresh(child, false);
        Ok(true)
    }

    fn clear_parents(&self, id: NodeId) -> Result<(), GraphError> {
        let parents: ParentIds = self.slot(id)?.state.lock().parents.keys().copied().collect();
        for parent in parents {
            self.unlink_from(id, parent, parent)?;
        }
        Ok(())
    }

    fn clear_children(&self, id: NodeId) -> Result<(), GraphError> {
        let children: ParentIds = self.slot(id)?.state.lock().children.iter().copied().collect();
        for child in children {
            self.unlink_from(child, id, child)?;
        }
        Ok(())
    }

    /// Unlink while clearing `other`'s neighbour. If `other` was removed in
    /// the meantime, its own removal already dropped the edge.
    fn unlink_from(&self, child: NodeId, parent: NodeId, other: NodeId) -> Result<(), GraphError> {
        match self.unlink(child, parent) {
            Ok(_) => Ok(()),
            Err(GraphError::UnknownNode(id)) if id == other => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn topology_guard(&self) -> Option<MutexGuard<'_, ()>> {
        match self.config.cycle_detection {
            CycleDetection::Transitive => Some(self.topology.lock()),
            CycleDetection::Immediate => None,
        }
    }

    /// Whether `ancestor` is reachable from `node` by following parent edges.
    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([node]);

        while let Some(id) = queue.pop_front() {
            if id == ancestor {
                return true;
            }
            if !visited.insert(id) {
                continue;
            }
            if let Ok(slot) = self.slot(id) {
                queue.extend(slot.state.lock().parents.keys().copied());
            }
        }

        false
    }

    /// Fold a node's local value with its parents' values.
    fn fold(&self, slot: &NodeSlot<T>) -> Option<T> {
        let (mut value, strategy, parents) = {
            let state = slot.state.lock();
            let parents: ParentIds = state.parents.keys().copied().collect();
            (state.local.clone(), state.strategy, parents)
        };

        for parent in parents {
            // A parent removed concurrently no longer contributes.
            if let Ok(parent_slot) = self.slot(parent) {
                value = strategy.prefer(value, self.fold(&parent_slot));
            }
        }

        value
    }

    /// Recompute a node's value and announce it if it moved, or always when
    /// `force` is set.
    fn refresh(&self, id: NodeId, force: bool) {
        let Ok(slot) = self.slot(id) else {
            return;
        };

        // Fold and store under one guard: `observed` is the latest fold.
        let guard = slot.refresh.lock();
        let value = self.fold(&slot);
        let changed = {
            let mut state = slot.state.lock();
            let changed = state.observed != value;
            state.observed = value;
            changed
        };
        drop(guard);

        if changed || force {
            trace!(node = %id, changed, "announcing value");
            slot.notifier.announce(PropertyEvent::changed(VALUE));
        }
    }

    fn on_parent_changed(graph: &Weak<Self>, child: NodeId) {
        if let Some(graph) = graph.upgrade() {
            graph.refresh(child, false);
        }
    }
}

/// Error for linking `parent -> child` while `child -> parent` exists,
/// reported from the side of the node whose method was called.
fn conflict(child: NodeId, parent: NodeId, requester: NodeId) -> GraphError {
    if requester == child {
        GraphError::AlreadyChild { node: child, other: parent }
    } else {
        GraphError::AlreadyParent { node: parent, other: child }
    }
}
