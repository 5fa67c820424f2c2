//! Debug views of the engine.
//!
//! [`GraphSnapshot`] is a point-in-time copy of the graph structure that can
//! be printed or serialized. It carries ids, names and states only, never
//! values.

use serde::{Deserialize, Serialize};

use crate::graph::{Node, NodeId, NodeKind, NodeState};

/// One node of a [`GraphSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: NodeKind,
    pub state: NodeState,
    pub version: u64,
    pub name: Option<String>,
    pub dependencies: Vec<NodeId>,
    pub dependents: Vec<NodeId>,
}

impl From<&Node> for NodeSnapshot {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id(),
            kind: node.kind(),
            state: node.state(),
            version: node.version(),
            name: node.name().map(|n| n.to_string()),
            dependencies: node.dependencies().iter().copied().collect(),
            dependents: node.dependents().iter().copied().collect(),
        }
    }
}

/// Structure of the whole graph at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeSnapshot>,
    /// Effects waiting for the next flush, in run order.
    pub pending_effects: Vec<NodeId>,
    pub batch_depth: usize,
}

impl GraphSnapshot {
    pub fn node(&self, id: NodeId) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Look a node up by debug name.
    pub fn named(&self, name: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.name.as_deref() == Some(name))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
