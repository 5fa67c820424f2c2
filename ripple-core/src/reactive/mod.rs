//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos, and effects.
//! These primitives form the foundation of Ripple's fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a tracking context (such as a memo or effect), the signal automatically
//! registers that context as a dependent. When the signal's value changes, all
//! dependents are notified.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only when
//! one of its dependencies changes, and only when someone reads it. Memos are
//! useful for expensive computations that should not be repeated unnecessarily.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its dependencies
//! change. Effects are used to synchronize reactive state with external systems,
//! such as persisting state or logging.
//!
//! ## Batches
//!
//! Inside a batch, writes apply immediately but effects wait until the
//! outermost batch closes, and then run once each.
//!
//! # Implementation Notes
//!
//! Every primitive belongs to a [`Runtime`], which keeps a stack of evaluation
//! frames. When a signal is read, the runtime checks whether a computation is
//! running and, if so, records the dependency in its frame.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod action;
mod batch;
mod cancel;
mod context;
mod effect;
mod memo;
mod runtime;
mod signal;
mod subscriber;

pub use action::Action;
pub use batch::BatchGuard;
pub use cancel::CancelToken;
pub use context::ReactiveContext;
pub use effect::{Cleanup, Effect, EffectContext, EffectOptions, EffectOutput};
pub use memo::Memo;
pub use runtime::{action, batch, untrack, Runtime};
pub use signal::Signal;
pub use subscriber::Subscription;
