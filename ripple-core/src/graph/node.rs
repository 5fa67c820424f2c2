//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
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
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// A source node (signal). These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Source,

    /// A derived node (memo). These have dependencies and may have dependents.
    /// They cache their computed value.
    Derived,

    /// An effect node. These are leaves of the graph.
    /// They have dependencies but no dependents (they produce side effects, not values).
    Effect,
}

impl NodeKind {
    /// Effects run eagerly; everything else is pulled on read.
    pub fn is_eager(&self) -> bool {
        matches!(self, NodeKind::Effect)
    }
}

/// Evaluation state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// The node's value is up-to-date.
    Clean,

    /// Something upstream changed, but no direct dependency is known to have
    /// a new value yet. Dependencies must be brought up to date before
    /// deciding whether to recompute.
    MaybeDirty,

    /// A direct dependency has a new value. The node must recompute.
    Dirty,

    /// The node's function is executing right now.
    Computing,
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    /// Unique identifier for this node.
    id: NodeId,

    /// What kind of node this is.
    kind: NodeKind,

    state: NodeState,

    /// Bumped on every write (sources) or every recomputation that produced
    /// a different value (derived).
    version: u64,

    /// Debug name; never part of identity.
    name: Option<Arc<str>>,

    /// Nodes that this node depends on, in first-read order.
    dependencies: IndexSet<NodeId>,

    /// Nodes that depend on this node, in subscription order.
    dependents: IndexSet<NodeId>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind, name: Option<Arc<str>>) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            state: match kind {
                NodeKind::Source => NodeState::Clean,
                // Start dirty to ensure first computation
                NodeKind::Derived | NodeKind::Effect => NodeState::Dirty,
            },
            version: 0,
            name,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
        }
    }

    /// Create a new source (signal) node.
    pub fn source(name: Option<Arc<str>>) -> Self {
        Self::new(NodeKind::Source, name)
    }

    /// Create a new derived (memo) node.
    pub fn derived(name: Option<Arc<str>>) -> Self {
        Self::new(NodeKind::Derived, name)
    }

    /// Create a new effect node.
    pub fn effect(name: Option<Arc<str>>) -> Self {
        Self::new(NodeKind::Effect, name)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn set_state(&mut self, state: NodeState) {
        self.state = state;
    }

    pub fn is_clean(&self) -> bool {
        self.state == NodeState::Clean
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn bump_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub fn name(&self) -> Option<&Arc<str>> {
        self.name.as_ref()
    }

    /// Name for diagnostics: the debug name, or the id.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.to_string(),
            None => self.id.to_string(),
        }
    }

    /// Raise the state to `MaybeDirty` if clean.
    ///
    /// Returns `true` if the state changed.
    pub fn mark_maybe_dirty(&mut self) -> bool {
        if self.state == NodeState::Clean {
            self.state = NodeState::MaybeDirty;
            true
        } else {
            false
        }
    }

    /// Raise the state to `Dirty` unless computing.
    ///
    /// Returns the state the node had before.
    pub fn mark_dirty(&mut self) -> NodeState {
        let previous = self.state;
        if matches!(previous, NodeState::Clean | NodeState::MaybeDirty) {
            self.state = NodeState::Dirty;
        }
        previous
    }

    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    pub(crate) fn replace_dependencies(&mut self, deps: IndexSet<NodeId>) -> IndexSet<NodeId> {
        std::mem::replace(&mut self.dependencies, deps)
    }

    pub fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.shift_remove(&node_id);
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn source_node_starts_clean() {
        let node = Node::source(None);
        assert_eq!(node.kind(), NodeKind::Source);
        assert!(node.is_clean());
        assert!(!node.kind().is_eager());
    }

    #[test]
    fn derived_node_starts_dirty() {
        let node = Node::derived(Some("total".into()));
        assert_eq!(node.kind(), NodeKind::Derived);
        assert_eq!(node.state(), NodeState::Dirty);
        assert_eq!(node.label(), "total");
    }

    #[test]
    fn unnamed_node_is_labelled_by_id() {
        let node = Node::effect(None);
        assert_eq!(node.label(), format!("#{}", node.id().raw()));
    }

    #[test]
    fn state_transitions() {
        let mut node = Node::derived(None);
        node.set_state(NodeState::Clean);

        assert!(node.mark_maybe_dirty());
        assert!(!node.mark_maybe_dirty());
        assert_eq!(node.state(), NodeState::MaybeDirty);

        assert_eq!(node.mark_dirty(), NodeState::MaybeDirty);
        assert_eq!(node.state(), NodeState::Dirty);

        // A computing node keeps its state; staleness is checked on exit.
        node.set_state(NodeState::Computing);
        assert_eq!(node.mark_dirty(), NodeState::Computing);
        assert!(!node.mark_maybe_dirty());
        assert_eq!(node.state(), NodeState::Computing);
    }

    #[test]
    fn version_only_moves_forward() {
        let mut node = Node::source(None);
        assert_eq!(node.version(), 0);
        assert_eq!(node.bump_version(), 1);
        assert_eq!(node.bump_version(), 2);
    }
}
