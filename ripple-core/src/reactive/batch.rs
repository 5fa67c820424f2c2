//! Batching
//!
//! While a batch is open, writes still update their signals immediately and
//! memos are still marked dirty, but effect execution is deferred. Each batch
//! frame collects the effects marked during it; leaving a nested frame hands
//! its queue to the parent, and leaving the outermost frame hands it to the
//! runtime's pending queue, which is then flushed once.
//!
//! Queues are insertion-ordered sets: an effect marked several times runs
//! once, at the position where it was first marked.

use indexmap::IndexSet;
use tracing::{error, trace};

use super::runtime::Runtime;
use crate::error::Result;
use crate::graph::NodeId;

#[derive(Debug, Default)]
struct BatchFrame {
    queued: IndexSet<NodeId>,
}

/// Effect queues for open batches plus the pending queue drained by flushes.
#[derive(Debug, Default)]
pub(crate) struct BatchQueue {
    frames: Vec<BatchFrame>,
    pending: IndexSet<NodeId>,
}

impl BatchQueue {
    /// Open a batch frame and return the new depth.
    pub(crate) fn enter(&mut self) -> usize {
        self.frames.push(BatchFrame::default());
        self.frames.len()
    }

    /// Close the innermost frame. Returns `true` if it was the outermost one.
    pub(crate) fn exit(&mut self) -> bool {
        let Some(frame) = self.frames.pop() else {
            return false;
        };
        match self.frames.last_mut() {
            Some(parent) => {
                parent.queued.extend(frame.queued);
                false
            }
            None => {
                self.pending.extend(frame.queued);
                true
            }
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn enqueue(&mut self, effects: impl IntoIterator<Item = NodeId>) {
        let queue = match self.frames.last_mut() {
            Some(frame) => &mut frame.queued,
            None => &mut self.pending,
        };
        queue.extend(effects);
    }

    /// Take the next effect to run, in first-marked order.
    pub(crate) fn pop_pending(&mut self) -> Option<NodeId> {
        self.pending.shift_remove_index(0)
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn pending(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.pending.iter().copied()
    }

    pub(crate) fn clear_pending(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Remove a disposed effect from every queue.
    pub(crate) fn forget(&mut self, id: NodeId) {
        self.pending.shift_remove(&id);
        for frame in &mut self.frames {
            frame.queued.shift_remove(&id);
        }
    }
}

/// An open batch.
///
/// Returned by [`Runtime::enter_batch`]. Call [`exit`](BatchGuard::exit) to
/// close it and receive any error raised by the flush. A guard that is
/// dropped without `exit` still closes its frame; outside of a panic it also
/// flushes and logs a flush error it cannot return.
#[must_use = "dropping a BatchGuard closes the batch immediately"]
pub struct BatchGuard {
    runtime: Runtime,
    depth: usize,
    closed: bool,
}

impl BatchGuard {
    pub(crate) fn open(runtime: &Runtime) -> Self {
        let depth = runtime.lock().batches.enter();
        trace!(target: "ripple::batch", depth, "batch opened");
        Self {
            runtime: runtime.clone(),
            depth,
            closed: false,
        }
    }

    /// Nesting depth of this batch, starting at 1 for the outermost.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_outermost(&self) -> bool {
        self.depth == 1
    }

    /// Close the batch. Closing the outermost batch runs every effect that
    /// was marked inside it, once each.
    pub fn exit(mut self) -> Result<()> {
        self.closed = true;
        if self.close() {
            self.runtime.flush()
        } else {
            Ok(())
        }
    }

    fn close(&self) -> bool {
        let mut state = self.runtime.lock();
        debug_assert_eq!(state.batches.depth(), self.depth, "batch frames closed out of order");
        let outermost = state.batches.exit();
        trace!(target: "ripple::batch", depth = self.depth, outermost, "batch closed");
        outermost
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Unwinding: keep queued effects for a later flush rather than
        // running user code during a panic.
        if self.close() && !std::thread::panicking() {
            if let Err(err) = self.runtime.flush() {
                error!(target: "ripple::batch", error = %err, "flush failed while dropping batch");
            }
        }
    }
}
