//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns cached value.
//!
//! 3. When a signal it reads changes, the memo is marked "dirty". When a memo
//!    it reads might have changed, it is marked "maybe dirty".
//!
//! 4. On next access, a maybe-dirty memo first brings the memos it reads up
//!    to date. If none of them produced a new value, it is marked clean and
//!    its cache is returned.
//!
//! 5. Otherwise it recomputes. Dependents are only told about the new value
//!    if it differs from the cached one.
//!
//! # Why This Matters
//!
//! This "lazy" approach avoids unnecessary recomputation:
//!
//! - A signal changes
//! - 10 memos depend on it
//! - Only the memos actually accessed will recompute
//! - Memos that are never read stay dirty (no wasted work)
//!
//! # Thread Safety
//!
//! Memos are thread-safe. The cached value sits behind a lock that is not
//! held while the computation runs.

use std::fmt::Debug;
use std::panic;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::runtime::{Reactive, Registered, Runtime};
use super::subscriber::Subscription;
use crate::error::Result;
use crate::graph::{Node, NodeId, NodeState};

struct MemoInner<T> {
    runtime: Runtime,
    id: NodeId,
    name: Option<Arc<str>>,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    /// `None` until the first computation.
    value: RwLock<Option<T>>,
}

impl<T> Reactive for MemoInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn update(&self) -> Result<bool> {
        let tracked = self.runtime.run_tracked(self.id, || (self.compute)())?;

        let changed = {
            let mut cached = self.value.write();
            if cached.as_ref() == Some(&tracked.value) {
                false
            } else {
                *cached = Some(tracked.value);
                true
            }
        };
        self.runtime.finish_derived(self.id, changed, tracked.stale);

        if self.runtime.debug_allows(self.name.as_deref()) {
            debug!(
                target: "ripple::memo",
                memo = %self.runtime.label(self.id),
                changed,
                stale = tracked.stale,
                "memo recomputed"
            );
        }
        Ok(changed)
    }
}

impl<T> Drop for MemoInner<T> {
    fn drop(&mut self) {
        self.runtime.remove_node(self.id);
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Must be Clone + Send + Sync + PartialEq.
///
/// The PartialEq bound is needed to detect when the computed value actually
/// changed (some memos might return the same value even if inputs changed).
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let runtime = Runtime::new();
/// let count = runtime.signal(2);
/// let doubled = {
///     let count = count.clone();
///     runtime.memo(move || count.get() * 2)
/// };
///
/// assert_eq!(doubled.get(), 4);
/// count.set(5).unwrap();
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    inner: Arc<MemoInner<T>>,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Runtime::current().memo(compute)
    }

    pub fn named<F>(name: &str, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Runtime::current().memo_named(name, compute)
    }

    pub(crate) fn create<F>(runtime: &Runtime, name: Option<Arc<str>>, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let node = Node::derived(name.clone());
        let id = node.id();
        let inner = Arc::new(MemoInner {
            runtime: runtime.clone(),
            id,
            name,
            compute: Box::new(compute),
            value: RwLock::new(None),
        });
        let weak: std::sync::Weak<dyn Reactive> = Arc::downgrade(&inner) as _;
        runtime.register(node, Some(Registered::Weak(weak)));
        Self { inner }
    }

    /// Get the memo's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// # Panics
    ///
    /// Panics if evaluation fails, for example on a cyclic dependency. Use
    /// [`try_get`](Memo::try_get) to handle the error instead. Inside another
    /// memo or effect the failure is handed to the outermost computation,
    /// which reports it as an error.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) if self.inner.runtime.in_computation() => panic::resume_unwind(Box::new(err)),
            Err(err) => panic!("{err}"),
        }
    }

    /// Get the current value, recomputing if necessary.
    pub fn try_get(&self) -> Result<T> {
        let runtime = &self.inner.runtime;
        let _evaluation = runtime.evaluation();
        runtime.update_if_necessary(self.inner.id)?;
        runtime.track(self.inner.id);
        let value = self
            .inner
            .value
            .read()
            .clone()
            .expect("clean memo should have a value");
        Ok(value)
    }

    /// Get the current value without registering a dependency.
    pub fn get_untracked(&self) -> Result<T> {
        self.inner.runtime.untrack(|| self.try_get())
    }

    /// Get the current evaluation state.
    pub fn state(&self) -> NodeState {
        self.inner
            .runtime
            .state_of(self.inner.id)
            .unwrap_or(NodeState::Dirty)
    }

    /// Number of recomputations that produced a new value.
    pub fn version(&self) -> u64 {
        self.inner.runtime.version_of(self.inner.id)
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.read().is_some()
    }

    /// Call `listener` with each new value.
    ///
    /// Subscribing reads the memo once; the listener is only called for
    /// values computed after that.
    pub fn subscribe<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let memo = self.clone();
        Subscription::attach(&self.inner.runtime, self.name(), move || memo.try_get(), listener)
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
