//! Named actions.
//!
//! An action wraps a function so that every call shows up in traces under
//! the action's name. It has no effect on the graph: writes made inside an
//! action behave exactly as they would outside it. Wrap the body in
//! [`Runtime::batch`] if the writes should be grouped.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, debug_span};

use super::runtime::Runtime;

/// A named, traced wrapper around a function.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let runtime = Runtime::new();
/// let count = runtime.signal(0);
/// let increment = {
///     let count = count.clone();
///     runtime.action("increment", move |by: i32| count.update(|v| v + by))
/// };
///
/// increment.call(2).unwrap();
/// assert_eq!(count.get(), 2);
/// ```
pub struct Action<F> {
    runtime: Runtime,
    name: Arc<str>,
    f: F,
}

impl<F> Action<F> {
    pub(crate) fn new(runtime: &Runtime, name: &str, f: F) -> Self {
        Self {
            runtime: runtime.clone(),
            name: name.into(),
            f,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call the wrapped function.
    pub fn call<A, R>(&self, args: A) -> R
    where
        F: Fn(A) -> R,
    {
        let span = debug_span!(target: "ripple::action", "action", name = %self.name);
        let _entered = span.enter();

        let logged = self.runtime.debug_allows(Some(&*self.name));
        let started = (logged && self.runtime.timing_enabled()).then(Instant::now);
        let result = (self.f)(args);

        if let Some(started) = started {
            debug!(
                target: "ripple::action",
                action = %self.name,
                elapsed_us = started.elapsed().as_micros() as u64,
                "action finished"
            );
        } else if logged {
            debug!(target: "ripple::action", action = %self.name, "action finished");
        }
        result
    }
}

impl<F: Clone> Clone for Action<F> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            name: Arc::clone(&self.name),
            f: self.f.clone(),
        }
    }
}

impl<F> fmt::Debug for Action<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action").field("name", &self.name).finish()
    }
}
