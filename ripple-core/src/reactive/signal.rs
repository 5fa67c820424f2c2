//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (memo/effect), the
//!    signal is recorded as a dependency of that computation.
//!
//! 2. When a signal is written, its version is bumped and the runtime marks
//!    everything downstream.
//!
//! 3. Effects downstream run at the end of the write, or when the enclosing
//!    batch closes.
//!
//! Change detection is by replacement: writing a value equal to the current
//! one still counts as a change. [`Signal::set_if_changed`] opts into an
//! equality check.
//!
//! # Thread Safety
//!
//! The value is protected by an `RwLock`; graph bookkeeping lives in the
//! runtime. Handles are cheap to clone and share one value.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use super::runtime::Runtime;
use super::subscriber::Subscription;
use crate::error::Result;
use crate::graph::{Node, NodeId};

struct SignalInner<T> {
    runtime: Runtime,
    id: NodeId,
    name: Option<Arc<str>>,
    value: RwLock<T>,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        self.runtime.remove_node(self.id);
    }
}

/// A reactive signal holding a value of type T.
///
/// # Type Parameters
///
/// - `T`: The type of value stored in the signal. Must be Clone + Send + Sync.
///
/// # Example
///
/// ```rust
/// use ripple_core::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies dependents)
/// count.set(5).unwrap();
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal on the current thread's runtime.
    pub fn new(value: T) -> Self {
        Runtime::current().signal(value)
    }

    /// Create a new signal with a debug name.
    pub fn named(name: &str, value: T) -> Self {
        Runtime::current().signal_named(name, value)
    }

    pub(crate) fn create(runtime: &Runtime, name: Option<Arc<str>>, value: T) -> Self {
        let id = runtime.register(Node::source(name.clone()), None);
        Self {
            inner: Arc::new(SignalInner {
                runtime: runtime.clone(),
                id,
                name,
                value: RwLock::new(value),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Number of writes so far.
    pub fn version(&self) -> u64 {
        self.inner.runtime.version_of(self.inner.id)
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the signal
    /// as a dependency of the running computation.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Borrow the current value, tracking like [`get`](Signal::get).
    ///
    /// Do not write to this signal from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let _evaluation = self.inner.runtime.evaluation();
        self.inner.runtime.track(self.inner.id);
        let guard = self.inner.value.read();
        f(&guard)
    }

    /// Set a new value and notify dependents.
    ///
    /// Fails with [`ReentrantWrite`](crate::ReactiveError::ReentrantWrite)
    /// when called from inside a memo. Otherwise returns the first error
    /// raised by an effect that ran because of this write.
    pub fn set(&self, value: T) -> Result<()> {
        let _evaluation = self.inner.runtime.evaluation();
        self.inner.runtime.check_write(self.inner.id)?;
        *self.inner.value.write() = value;
        self.inner.runtime.notify_changed(self.inner.id)
    }

    /// Update the value using a function of the previous one.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        let _evaluation = self.inner.runtime.evaluation();
        self.inner.runtime.check_write(self.inner.id)?;
        let next = {
            let guard = self.inner.value.read();
            f(&guard)
        };
        self.set(next)
    }

    /// Call `listener` with the new value after every change.
    ///
    /// The listener is not called for the current value. It runs as an
    /// effect, so it is deferred inside batches.
    pub fn subscribe<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let signal = self.clone();
        Subscription::attach(&self.inner.runtime, self.name(), move || Ok(signal.get()), listener)
    }

    /// Borrow the value without tracking, even inside a computation.
    pub fn peek<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.read())
    }

    fn label(&self) -> String {
        match &self.inner.name {
            Some(name) => name.to_string(),
            None => self.inner.id.to_string(),
        }
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Write only if `value` differs from the current value.
    ///
    /// Returns whether a write happened.
    pub fn set_if_changed(&self, value: T) -> Result<bool> {
        let _evaluation = self.inner.runtime.evaluation();
        if *self.inner.value.read() == value {
            trace!(target: "ripple::signal", signal = %self.label(), "write skipped, value unchanged");
            return Ok(false);
        }
        self.set(value)?;
        Ok(true)
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
