//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between signals, memos and effects.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent reactive values (signals) or computations (memos, effects)
//! - Edges represent dependencies: if A depends on B, there is an edge from B to A
//!
//! When a signal changes, we traverse the graph to find all affected nodes
//! and mark them. Memos are pulled up to date lazily when read; effects are
//! handed back to the runtime for execution.
//!
//! # Design Decisions
//!
//! 1. The graph is centralized rather than stored as linked lists inside each
//!    primitive. One table makes the subscriber-set invariant easy to check
//!    and keeps the per-primitive handles small.
//!
//! 2. The graph is indexed by node ID for O(1) lookups.
//!
//! 3. Both forward (dependencies) and reverse (dependents) edges are kept.
//!    Dependency sets are replaced wholesale after each evaluation by a
//!    diff-and-patch step rather than edited in place.
//!
//! The graph holds no values and no closures; those live in the handles.

mod node;
mod scheduler;

pub use node::{Node, NodeId, NodeKind, NodeState};
pub use scheduler::{Reached, UpdateScheduler};
