//! Ripple Core
//!
//! This crate provides a fine-grained reactive state engine. It implements:
//!
//! - Reactive primitives (signals, memos, effects)
//! - Lazy, glitch-free invalidation over a dependency graph
//! - Nested batching with a single flush at the outermost exit
//! - Effect cleanup, cancellation and loop guards, including async effects
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives, the runtime and dependency tracking
//! - `graph`: Dependency graph and invalidation
//! - `config`: Runtime and debug configuration
//! - `debug`: Serializable snapshots of the graph
//! - `error`: Error types
//!
//! # Example
//!
//! ```rust
//! use ripple_core::Runtime;
//!
//! let runtime = Runtime::new();
//!
//! // Create a signal
//! let count = runtime.signal(0);
//!
//! // Create a derived value
//! let doubled = {
//!     let count = count.clone();
//!     runtime.memo(move || count.get() * 2)
//! };
//!
//! // Create an effect
//! let effect = {
//!     let (count, doubled) = (count.clone(), doubled.clone());
//!     runtime
//!         .effect(move |_| println!("Count: {}, Doubled: {}", count.get(), doubled.get()))
//!         .unwrap()
//! };
//!
//! // Update the signal
//! count.set(5).unwrap();
//! // Effect automatically runs, prints: "Count: 5, Doubled: 10"
//!
//! effect.dispose();
//! ```

pub mod config;
pub mod debug;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::{DebugConfig, RuntimeConfig};
pub use debug::{GraphSnapshot, NodeSnapshot};
pub use error::{ReactiveError, Result};
pub use graph::{NodeId, NodeKind, NodeState};
pub use reactive::{
    action, batch, untrack, Action, BatchGuard, CancelToken, Cleanup, Effect, EffectContext,
    EffectOptions, EffectOutput, Memo, ReactiveContext, Runtime, Signal, Subscription,
};
