//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It owns the dependency graph, the frame stack used for
//! dependency tracking, the batch queues and the registry of live
//! computations.
//!
//! # How It Works
//!
//! 1. When a signal, memo or effect is created, it registers a node with the
//!    runtime.
//!
//! 2. When a memo or effect reads a signal or memo, the runtime records the
//!    dependency in the current frame.
//!
//! 3. When a signal's value changes, the runtime:
//!    a. Marks direct dependents dirty and the rest downstream maybe-dirty
//!    b. Queues the effects it reached
//!    c. Flushes the queue, unless a batch or another flush is in progress
//!    d. Leaves memos alone - they recompute on next access
//!
//! # Threading
//!
//! A runtime is a single logical thread of evaluation. Graph bookkeeping sits
//! behind a mutex that is never held while user code runs, and a reentrant
//! evaluation lock serialises whole reads, writes and flushes. Handles are
//! `Send + Sync` so async effects running on tokio workers can write
//! signals; such writes simply wait for the evaluation in progress.
//!
//! Every thread has a default runtime, returned by [`Runtime::current`].
//! Tests and embedders that want isolation build their own with
//! [`Runtime::new`].

use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard, RwLock};
use smallvec::SmallVec;
use tracing::{debug, error, warn};

use super::action::Action;
use super::batch::{BatchGuard, BatchQueue};
use super::context::{FrameStack, ReactiveContext};
use super::effect::{Effect, EffectContext, EffectOptions, EffectOutput};
use super::memo::Memo;
use super::signal::Signal;
use crate::config::{DebugConfig, RuntimeConfig};
use crate::debug::GraphSnapshot;
use crate::error::{ReactiveError, Result};
use crate::graph::{Node, NodeId, NodeKind, NodeState, Reached, UpdateScheduler};

/// A computation the runtime can bring up to date.
pub(crate) trait Reactive: Send + Sync {
    /// Recompute a memo or run an effect.
    ///
    /// Returns whether the observable output changed.
    fn update(&self) -> Result<bool>;
}

/// Registry entry. Memos are owned by their handles; effects stay alive
/// until disposed.
pub(crate) enum Registered {
    Weak(Weak<dyn Reactive>),
    Strong(Arc<dyn Reactive>),
}

impl Registered {
    fn upgrade(&self) -> Option<Arc<dyn Reactive>> {
        match self {
            Registered::Weak(weak) => weak.upgrade(),
            Registered::Strong(strong) => Some(Arc::clone(strong)),
        }
    }
}

/// Mutable engine state, guarded by one mutex.
pub(crate) struct RuntimeState {
    pub(crate) graph: UpdateScheduler,
    pub(crate) frames: FrameStack,
    pub(crate) batches: BatchQueue,
    registry: HashMap<NodeId, Registered>,
    flushing: bool,
}

/// Result of running a function inside a tracked frame.
pub(crate) struct Tracked<R> {
    pub(crate) value: R,
    /// A dependency changed after it was read.
    pub(crate) stale: bool,
}

pub(crate) struct RuntimeInner {
    state: Mutex<RuntimeState>,
    evaluation: ReentrantMutex<()>,
    config: RwLock<RuntimeConfig>,
}

/// Handle to a reactive engine.
///
/// Cloning is cheap; all clones drive the same graph.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

thread_local! {
    static CURRENT: Runtime = Runtime::new();
}

impl Runtime {
    /// Create an isolated runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                state: Mutex::new(RuntimeState {
                    graph: UpdateScheduler::new(),
                    frames: FrameStack::default(),
                    batches: BatchQueue::default(),
                    registry: HashMap::new(),
                    flushing: false,
                }),
                evaluation: ReentrantMutex::new(()),
                config: RwLock::new(config),
            }),
        }
    }

    /// The calling thread's default runtime.
    pub fn current() -> Self {
        CURRENT.with(Runtime::clone)
    }

    /// Whether two handles refer to the same engine.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    pub fn signal<T>(&self, value: T) -> Signal<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Signal::create(self, None, value)
    }

    pub fn signal_named<T>(&self, name: &str, value: T) -> Signal<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Signal::create(self, Some(name.into()), value)
    }

    pub fn memo<T, F>(&self, compute: F) -> Memo<T>
    where
        T: Clone + Send + Sync + PartialEq + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Memo::create(self, None, compute)
    }

    pub fn memo_named<T, F>(&self, name: &str, compute: F) -> Memo<T>
    where
        T: Clone + Send + Sync + PartialEq + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Memo::create(self, Some(name.into()), compute)
    }

    /// Register an effect with default options. It runs once immediately.
    pub fn effect<F, O>(&self, body: F) -> Result<Effect>
    where
        F: Fn(&EffectContext) -> O + Send + Sync + 'static,
        O: EffectOutput,
    {
        self.effect_with(EffectOptions::default(), body)
    }

    pub fn effect_with<F, O>(&self, options: EffectOptions, body: F) -> Result<Effect>
    where
        F: Fn(&EffectContext) -> O + Send + Sync + 'static,
        O: EffectOutput,
    {
        Effect::create(self, options, body)
    }

    /// Register an effect whose body returns a future.
    ///
    /// Reads made before the future is returned are tracked. The future is
    /// spawned on the ambient tokio runtime and its output is applied only if
    /// the run was not cancelled in the meantime.
    pub fn async_effect<F, Fut, O>(&self, options: EffectOptions, body: F) -> Result<Effect>
    where
        F: Fn(&EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
        O: EffectOutput + 'static,
    {
        Effect::create_async(self, options, body)
    }

    /// Wrap `f` as a named action.
    pub fn action<F>(&self, name: &str, f: F) -> Action<F> {
        Action::new(self, name, f)
    }

    // ------------------------------------------------------------------
    // Batching and flushing
    // ------------------------------------------------------------------

    /// Open a batch. Effects are deferred until the outermost batch closes.
    pub fn enter_batch(&self) -> BatchGuard {
        BatchGuard::open(self)
    }

    /// Run `f` inside a batch and flush once when the outermost batch ends.
    ///
    /// Batches nest transparently. An effect error during the final flush is
    /// returned; effects queued after the failing one stay queued.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let _evaluation = self.evaluation();
        let guard = self.enter_batch();
        let value = f();
        guard.exit()?;
        Ok(value)
    }

    /// Run queued effects now.
    ///
    /// Does nothing inside a batch or while another flush is running; those
    /// will flush on their own.
    ///
    /// The first effect error stops the flush and is returned. Effects that
    /// had not run yet stay queued, so they run on the next flush, which may
    /// be triggered by an unrelated write or batch whose caller then receives
    /// their errors.
    pub fn flush(&self) -> Result<()> {
        let _evaluation = self.evaluation();
        {
            let mut state = self.lock();
            if state.flushing || state.batches.depth() > 0 || !state.batches.has_pending() {
                return Ok(());
            }
            state.flushing = true;
        }
        let _flushing = FlushScope { runtime: self };

        let limit = self.inner.config.read().max_flush_iterations;
        let mut runs = 0usize;
        loop {
            let next = self.lock().batches.pop_pending();
            let Some(id) = next else {
                break;
            };
            runs += 1;
            if runs > limit {
                let dropped = self.lock().batches.clear_pending();
                error!(
                    target: "ripple::effect",
                    limit,
                    dropped,
                    "effect flush limit exceeded"
                );
                return Err(ReactiveError::FlushLimitExceeded { limit });
            }
            if let Err(err) = self.update_if_necessary(id) {
                warn!(
                    target: "ripple::effect",
                    effect = %self.label(id),
                    error = %err,
                    "flush aborted"
                );
                return Err(err);
            }
        }
        Ok(())
    }

    /// Run `f` without recording any reads as dependencies.
    pub fn untrack<R>(&self, f: impl FnOnce() -> R) -> R {
        let _evaluation = self.evaluation();
        let _ctx = ReactiveContext::untracked(self);
        f()
    }

    // ------------------------------------------------------------------
    // Configuration and introspection
    // ------------------------------------------------------------------

    pub fn config(&self) -> RuntimeConfig {
        self.inner.config.read().clone()
    }

    pub fn set_config(&self, config: RuntimeConfig) {
        *self.inner.config.write() = config;
    }

    pub fn debug(&self) -> DebugConfig {
        self.inner.config.read().debug.clone()
    }

    /// Change debug logging. Has no effect on evaluation.
    pub fn set_debug(&self, debug: DebugConfig) {
        self.inner.config.write().debug = debug;
    }

    pub(crate) fn debug_allows(&self, name: Option<&str>) -> bool {
        self.inner.config.read().debug.allows(name)
    }

    pub(crate) fn timing_enabled(&self) -> bool {
        self.inner.config.read().debug.timing
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let state = self.lock();
        GraphSnapshot {
            nodes: state.graph.snapshot(),
            pending_effects: state.batches.pending().collect(),
            batch_depth: state.batches.depth(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.lock().graph.node_count()
    }

    pub fn effect_count(&self) -> usize {
        self.lock().graph.count(NodeKind::Effect)
    }

    pub fn batch_depth(&self) -> usize {
        self.lock().batches.depth()
    }

    /// Whether a memo or effect is currently being evaluated.
    pub fn is_tracking(&self) -> bool {
        self.lock().frames.current_owner().is_some()
    }

    // ------------------------------------------------------------------
    // Crate internals
    // ------------------------------------------------------------------

    pub(crate) fn lock(&self) -> MutexGuard<'_, RuntimeState> {
        self.inner.state.lock()
    }

    pub(crate) fn evaluation(&self) -> ReentrantMutexGuard<'_, ()> {
        self.inner.evaluation.lock()
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_weak(weak: &Weak<RuntimeInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn register(&self, node: Node, entry: Option<Registered>) -> NodeId {
        let mut state = self.lock();
        let id = state.graph.add_node(node);
        if let Some(entry) = entry {
            state.registry.insert(id, entry);
        }
        id
    }

    /// Remove a node, its edges, queue entries and registry entry.
    pub(crate) fn remove_node(&self, id: NodeId) {
        let removed = {
            let mut state = self.lock();
            state.graph.remove_node(id);
            state.batches.forget(id);
            state.registry.remove(&id)
        };
        // Dropping an effect may drop signals captured by its closure, which
        // lock the state again.
        drop(removed);
    }

    pub(crate) fn label(&self, id: NodeId) -> String {
        self.lock().graph.label(id)
    }

    pub(crate) fn state_of(&self, id: NodeId) -> Option<NodeState> {
        self.lock().graph.state(id)
    }

    pub(crate) fn version_of(&self, id: NodeId) -> u64 {
        self.lock().graph.version(id).unwrap_or_default()
    }

    /// Record a read of `id` in the current frame.
    pub(crate) fn track(&self, id: NodeId) {
        let mut state = self.lock();
        if state.frames.current_owner().is_none() {
            return;
        }
        let version = state.graph.version(id).unwrap_or_default();
        state.frames.track(id, version);
    }

    /// Whether a failing nested read should unwind to an enclosing
    /// computation instead of panicking.
    pub(crate) fn in_computation(&self) -> bool {
        self.lock().frames.in_computation()
    }

    /// Reject writes from inside a memo's compute function.
    pub(crate) fn check_write(&self, signal: NodeId) -> Result<()> {
        let mut state = self.lock();
        let Some(derived) = state.frames.derived_owner() else {
            return Ok(());
        };
        let err = ReactiveError::ReentrantWrite {
            signal: state.graph.label(signal),
            derived: state.graph.label(derived),
        };
        state.frames.record_violation(derived, err.clone());
        error!(target: "ripple::signal", error = %err, "write rejected");
        Err(err)
    }

    /// Propagate a write to `signal` and flush unless deferred.
    pub(crate) fn notify_changed(&self, signal: NodeId) -> Result<()> {
        let deferred = {
            let mut state = self.lock();
            let (version, reached) = state.graph.mark_changed(signal);
            let queued = reached.len();
            state.batches.enqueue(reached);
            if self.debug_allows(state.graph.get_node(signal).and_then(|n| n.name()).map(|n| &**n)) {
                debug!(
                    target: "ripple::signal",
                    signal = %state.graph.label(signal),
                    version,
                    queued,
                    "signal updated"
                );
            }
            state.flushing || state.batches.depth() > 0
        };
        if deferred {
            Ok(())
        } else {
            self.flush()
        }
    }

    /// Bring `id` up to date: recompute a memo or run an effect if one of
    /// its dependencies really changed.
    pub(crate) fn update_if_necessary(&self, id: NodeId) -> Result<()> {
        let (state, deps) = {
            let state = self.lock();
            let Some(node) = state.graph.get_node(id) else {
                return Ok(());
            };
            let deps: SmallVec<[NodeId; 8]> = node
                .dependencies()
                .iter()
                .copied()
                .filter(|dep| state.graph.get_node(*dep).map(Node::kind) == Some(NodeKind::Derived))
                .collect();
            (node.state(), deps)
        };

        match state {
            NodeState::Clean => return Ok(()),
            NodeState::Computing => return Err(self.cycle_error(id)),
            NodeState::MaybeDirty => {
                for dep in deps {
                    self.update_if_necessary(dep)?;
                    if self.state_of(id) == Some(NodeState::Dirty) {
                        break;
                    }
                }
            }
            NodeState::Dirty => {}
        }

        match self.state_of(id) {
            Some(NodeState::Dirty) => {
                let reactive = {
                    let state = self.lock();
                    state.registry.get(&id).and_then(Registered::upgrade)
                };
                match reactive {
                    Some(reactive) => {
                        reactive.update()?;
                    }
                    None => self.lock().graph.set_state(id, NodeState::Clean),
                }
            }
            Some(NodeState::MaybeDirty) => self.lock().graph.set_state(id, NodeState::Clean),
            _ => {}
        }
        Ok(())
    }

    /// Run `f` as the computation of `id`, recording its reads.
    ///
    /// On success the node's dependency set is replaced by what was read and
    /// its state becomes `Clean`. A panic or a typed error unwinding out of
    /// `f` leaves the node `Dirty` with its previous dependencies.
    pub(crate) fn run_tracked<R>(&self, id: NodeId, f: impl FnOnce() -> R) -> Result<Tracked<R>> {
        let kind = {
            let mut state = self.lock();
            let Some(node) = state.graph.get_node_mut(id) else {
                drop(state);
                return Ok(Tracked {
                    value: f(),
                    stale: false,
                });
            };
            if node.state() == NodeState::Computing {
                drop(state);
                return Err(self.cycle_error(id));
            }
            node.set_state(NodeState::Computing);
            node.kind()
        };

        let ctx = ReactiveContext::enter(self, id, kind);
        let outcome = panic::catch_unwind(AssertUnwindSafe(f));
        let frame = ctx.exit();

        let value = match outcome {
            Ok(value) => value,
            Err(payload) => {
                self.lock().graph.set_state(id, NodeState::Dirty);
                return match payload.downcast::<ReactiveError>() {
                    Ok(err) => Err(*err),
                    Err(payload) => panic::resume_unwind(payload),
                };
            }
        };

        let mut state = self.lock();
        if let Some(err) = frame.violation {
            state.graph.set_state(id, NodeState::Dirty);
            return Err(err);
        }

        let stale = frame.deps.iter().any(|(dep, seen)| match state.graph.get_node(*dep) {
            Some(node) => {
                node.version() != *seen || (node.kind() == NodeKind::Derived && !node.is_clean())
            }
            None => false,
        });
        state.graph.apply_dependencies(id, frame.deps.keys().copied().collect());
        state.graph.set_state(id, NodeState::Clean);
        Ok(Tracked { value, stale })
    }

    /// Finish a memo recomputation.
    pub(crate) fn finish_derived(&self, id: NodeId, changed: bool, stale: bool) {
        let mut state = self.lock();
        if stale {
            state.graph.set_state(id, NodeState::Dirty);
        }
        if changed {
            state.graph.bump_version(id);
            let reached: Reached = state.graph.mark_dependents(id);
            state.batches.enqueue(reached);
        }
    }

    /// Mark an effect dirty and queue it for the current or next flush.
    pub(crate) fn requeue(&self, id: NodeId) {
        let mut state = self.lock();
        if state.graph.get_node(id).is_none() {
            return;
        }
        state.graph.set_state(id, NodeState::Dirty);
        state.batches.enqueue([id]);
    }

    /// Mark the start of an effect's first run.
    ///
    /// At top level this claims the flush so effects queued by the run wait
    /// until it finishes; the caller flushes after dropping the scope.
    /// Returns `None` inside a batch or a flush, which will run them anyway.
    pub(crate) fn claim_flush(&self) -> Option<FlushScope<'_>> {
        let mut state = self.lock();
        if state.flushing || state.batches.depth() > 0 {
            return None;
        }
        state.flushing = true;
        Some(FlushScope { runtime: self })
    }

    pub(crate) fn dependency_count(&self, id: NodeId) -> usize {
        self.lock()
            .graph
            .get_node(id)
            .map(|node| node.dependencies().len())
            .unwrap_or_default()
    }

    fn cycle_error(&self, id: NodeId) -> ReactiveError {
        let state = self.lock();
        let mut path: Vec<String> = state
            .frames
            .path_from(id)
            .into_iter()
            .map(|node| state.graph.label(node))
            .collect();
        path.push(state.graph.label(id));
        let err = ReactiveError::CyclicDependency { path };
        error!(target: "ripple::memo", error = %err, "cycle detected");
        err
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Runtime")
            .field("nodes", &state.graph.node_count())
            .field("frames", &state.frames.depth())
            .field("batch_depth", &state.batches.depth())
            .field("flushing", &state.flushing)
            .finish()
    }
}

/// Clears the flushing flag when a flush ends, including by panic.
pub(crate) struct FlushScope<'a> {
    runtime: &'a Runtime,
}

impl Drop for FlushScope<'_> {
    fn drop(&mut self) {
        self.runtime.lock().flushing = false;
    }
}

/// Run `f` in a batch on the current thread's runtime.
pub fn batch<R>(f: impl FnOnce() -> R) -> Result<R> {
    Runtime::current().batch(f)
}

/// Run `f` untracked on the current thread's runtime.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    Runtime::current().untrack(f)
}

/// Wrap `f` as a named action on the current thread's runtime.
pub fn action<F>(name: &str, f: F) -> Action<F> {
    Runtime::current().action(name, f)
}
