//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal or memo is read,
//! it is recorded as a dependency of the computation on top of the stack.
//!
//! # Implementation
//!
//! Each [`Runtime`] owns a stack of [`Frame`]s. Running a memo or effect
//! pushes a frame; reads register into the top frame; when the computation
//! completes the frame is popped and its dependency set replaces the node's
//! previous one in the graph.
//!
//! Nested frames are supported (a memo that reads another memo which needs
//! recomputation pushes a frame for the inner memo only). Untracked sections
//! push a frame without an owner, which swallows reads.

use indexmap::IndexMap;

use super::runtime::Runtime;
use crate::error::ReactiveError;
use crate::graph::{NodeId, NodeKind};

/// Bookkeeping for one evaluation.
#[derive(Debug)]
pub(crate) struct Frame {
    /// The computation being evaluated; `None` for untracked sections.
    pub(crate) owner: Option<(NodeId, NodeKind)>,
    /// Dependencies read so far, with the version observed at first read.
    pub(crate) deps: IndexMap<NodeId, u64>,
    /// Integrity violation raised inside this frame.
    pub(crate) violation: Option<ReactiveError>,
}

impl Frame {
    fn owned(id: NodeId, kind: NodeKind) -> Self {
        Self {
            owner: Some((id, kind)),
            deps: IndexMap::new(),
            violation: None,
        }
    }

    fn untracked() -> Self {
        Self {
            owner: None,
            deps: IndexMap::new(),
            violation: None,
        }
    }
}

/// The stack of active evaluation frames.
#[derive(Debug, Default)]
pub(crate) struct FrameStack {
    frames: Vec<Frame>,
}

impl FrameStack {
    pub(crate) fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub(crate) fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The computation reads are currently attributed to.
    pub(crate) fn current_owner(&self) -> Option<NodeId> {
        self.frames.last().and_then(|f| f.owner).map(|(id, _)| id)
    }

    /// Whether any computation is running, tracked or not.
    pub(crate) fn in_computation(&self) -> bool {
        self.frames.iter().any(|f| f.owner.is_some())
    }

    /// Record a read of `dep` at `version` in the top frame.
    ///
    /// Reads inside untracked sections and self-reads are ignored. A second
    /// read of the same dependency keeps the first observed version.
    pub(crate) fn track(&mut self, dep: NodeId, version: u64) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        match frame.owner {
            Some((owner, _)) if owner != dep => {
                frame.deps.entry(dep).or_insert(version);
            }
            _ => {}
        }
    }

    /// The nearest owning frame, if it belongs to a derived computation.
    pub(crate) fn derived_owner(&self) -> Option<NodeId> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.owner)
            .filter(|(_, kind)| *kind == NodeKind::Derived)
            .map(|(id, _)| id)
    }

    /// Attach a violation to the frame owned by `owner`.
    pub(crate) fn record_violation(&mut self, owner: NodeId, err: ReactiveError) {
        if let Some(frame) = self
            .frames
            .iter_mut()
            .rev()
            .find(|f| f.owner.map(|(id, _)| id) == Some(owner))
        {
            frame.violation.get_or_insert(err);
        }
    }

    /// Owners from the frame of `id` up to the top of the stack.
    pub(crate) fn path_from(&self, id: NodeId) -> Vec<NodeId> {
        let owners: Vec<NodeId> = self
            .frames
            .iter()
            .filter_map(|f| f.owner.map(|(owner, _)| owner))
            .collect();
        match owners.iter().position(|owner| *owner == id) {
            Some(start) => owners[start..].to_vec(),
            None => vec![id],
        }
    }
}

/// Guard that pops its frame when dropped.
///
/// This keeps the frame stack balanced even if the computation panics.
/// Call [`exit`](ReactiveContext::exit) to pop explicitly and take the
/// recorded dependencies.
pub struct ReactiveContext {
    runtime: Runtime,
    owner: Option<NodeId>,
    depth: usize,
    exited: bool,
}

impl ReactiveContext {
    /// Enter a tracked frame for the given computation.
    pub(crate) fn enter(runtime: &Runtime, id: NodeId, kind: NodeKind) -> Self {
        Self::push(runtime, Frame::owned(id, kind), Some(id))
    }

    /// Enter a frame in which reads are not recorded.
    pub fn untracked(runtime: &Runtime) -> Self {
        Self::push(runtime, Frame::untracked(), None)
    }

    fn push(runtime: &Runtime, frame: Frame, owner: Option<NodeId>) -> Self {
        let depth = {
            let mut state = runtime.lock();
            state.frames.push(frame);
            state.frames.depth()
        };
        Self {
            runtime: runtime.clone(),
            owner,
            depth,
            exited: false,
        }
    }

    /// Pop the frame and return what it recorded.
    pub(crate) fn exit(mut self) -> Frame {
        self.exited = true;
        self.pop().unwrap_or_else(Frame::untracked)
    }

    fn pop(&self) -> Option<Frame> {
        let mut state = self.runtime.lock();
        debug_assert_eq!(
            state.frames.depth(),
            self.depth,
            "ReactiveContext mismatch for {:?}",
            self.owner
        );
        let frame = state.frames.pop();
        if let Some(frame) = &frame {
            debug_assert_eq!(
                frame.owner.map(|(id, _)| id),
                self.owner,
                "ReactiveContext mismatch: expected {:?}",
                self.owner
            );
        }
        frame
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.exited {
            self.pop();
        }
    }
}
