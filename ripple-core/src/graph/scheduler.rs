//! Update Scheduler
//!
//! The scheduler owns every node of the dependency graph and applies the
//! invalidation rules when a source changes.
//!
//! # Algorithm
//!
//! Invalidation is push-pull:
//!
//! 1. When a source changes, its direct dependents are marked `Dirty`.
//! 2. Everything further downstream is marked `MaybeDirty`, once. A node that
//!    was already non-clean is not walked again, so each node is visited at
//!    most once per change.
//! 3. Effects reached by the walk are returned to the caller for queueing.
//! 4. Derived nodes are not recomputed here. When one is read later, it first
//!    brings its own dependencies up to date; only if one of them really
//!    produced a new value does it recompute (see
//!    [`UpdateScheduler::mark_dependents`]).

use std::collections::HashMap;

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::node::{Node, NodeId, NodeKind, NodeState};
use crate::debug::NodeSnapshot;

/// Effects reached by one invalidation walk, in first-marked order.
pub type Reached = SmallVec<[NodeId; 8]>;

/// The update scheduler manages the dependency graph and coordinates updates.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    /// All nodes in the graph, indexed by ID.
    nodes: HashMap<NodeId, Node>,
}

impl UpdateScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Also removes all edges involving this node.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&node_id)?;

        // Remove this node from its dependencies' dependent lists
        for dep_id in node.dependencies() {
            if let Some(dep) = self.nodes.get_mut(dep_id) {
                dep.remove_dependent(node_id);
            }
        }

        // Remove this node from its dependents' dependency lists
        for dependent_id in node.dependents() {
            if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                dependent.remove_dependency(node_id);
            }
        }

        Some(node)
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    pub fn state(&self, node_id: NodeId) -> Option<NodeState> {
        self.nodes.get(&node_id).map(Node::state)
    }

    pub fn version(&self, node_id: NodeId) -> Option<u64> {
        self.nodes.get(&node_id).map(Node::version)
    }

    pub fn label(&self, node_id: NodeId) -> String {
        self.nodes
            .get(&node_id)
            .map(Node::label)
            .unwrap_or_else(|| node_id.to_string())
    }

    /// Replace the dependency set of `node_id` with `new_deps`.
    ///
    /// Sources that are no longer read lose `node_id` as a dependent, newly
    /// read sources gain it. Sources that were removed from the graph in the
    /// meantime are skipped.
    pub fn apply_dependencies(&mut self, node_id: NodeId, new_deps: IndexSet<NodeId>) {
        let new_deps: IndexSet<NodeId> = new_deps
            .into_iter()
            .filter(|dep| *dep != node_id && self.nodes.contains_key(dep))
            .collect();

        let old_deps = match self.nodes.get_mut(&node_id) {
            Some(node) => node.replace_dependencies(new_deps.clone()),
            None => return,
        };

        for stale in old_deps.difference(&new_deps) {
            if let Some(dep) = self.nodes.get_mut(stale) {
                dep.remove_dependent(node_id);
            }
        }
        for fresh in new_deps.difference(&old_deps) {
            if let Some(dep) = self.nodes.get_mut(fresh) {
                dep.add_dependent(node_id);
            }
        }
    }

    /// Record a write to a source node and propagate dirty flags.
    ///
    /// Returns the new version and the effects that need to be queued.
    pub fn mark_changed(&mut self, source_id: NodeId) -> (u64, Reached) {
        let version = match self.nodes.get_mut(&source_id) {
            Some(source) => source.bump_version(),
            None => return (0, Reached::new()),
        };
        (version, self.mark_dependents(source_id))
    }

    /// Mark the direct dependents of `node_id` dirty and everything further
    /// downstream maybe-dirty.
    ///
    /// Used for sources on write and for derived nodes whose recomputation
    /// produced a different value.
    pub fn mark_dependents(&mut self, node_id: NodeId) -> Reached {
        let mut reached = Reached::new();
        let direct: Reached = match self.nodes.get(&node_id) {
            Some(node) => node.dependents().iter().copied().collect(),
            None => return reached,
        };

        let mut stack: Vec<NodeId> = Vec::new();
        for id in direct {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            let previous = node.mark_dirty();
            if previous == NodeState::Computing {
                continue;
            }
            if node.kind().is_eager() {
                reached.push(id);
            }
            if previous == NodeState::Clean {
                stack.extend(node.dependents().iter().copied());
            }
        }

        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            if node.mark_maybe_dirty() {
                if node.kind().is_eager() {
                    reached.push(id);
                }
                stack.extend(node.dependents().iter().copied());
            }
        }

        reached
    }

    /// Bump the version of a derived node whose value changed.
    pub fn bump_version(&mut self, node_id: NodeId) -> u64 {
        self.nodes
            .get_mut(&node_id)
            .map(Node::bump_version)
            .unwrap_or_default()
    }

    pub fn set_state(&mut self, node_id: NodeId, state: NodeState) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.set_state(state);
        }
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of nodes of the given kind.
    pub fn count(&self, kind: NodeKind) -> usize {
        self.nodes.values().filter(|n| n.kind() == kind).count()
    }

    /// Serializable view of every node, ordered by id.
    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        let mut nodes: Vec<NodeSnapshot> = self.nodes.values().map(NodeSnapshot::from).collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }
}
