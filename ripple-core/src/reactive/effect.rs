//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued and runs at the end
//!    of the write, or when the outermost batch closes.
//!
//! 3. Before re-running, the effect calls the cleanups left by its previous
//!    run. Dependencies are tracked afresh on every run.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Memos cache results; effects just run their side effect.
//!
//! # Cleanup
//!
//! Effects can optionally return a [`Cleanup`], or register several through
//! [`EffectContext::on_cleanup`]. Cleanups are called before the effect
//! re-runs and when the effect is disposed.
//!
//! # Async effects
//!
//! An async effect's body is tracked up to the point where it returns its
//! future. The future is spawned on the ambient tokio runtime; the engine
//! never awaits it. Its output is applied only if the run's token was not
//! cancelled by then.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::cancel::CancelToken;
use super::runtime::{Reactive, Registered, Runtime, RuntimeInner};
use crate::error::{ReactiveError, Result};
use crate::graph::{Node, NodeId};

/// A function to run before an effect's next run or on disposal.
pub struct Cleanup(Box<dyn FnOnce() + Send>);

impl Cleanup {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Box::new(f))
    }

    pub fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

/// What an effect body may return.
pub trait EffectOutput {
    fn into_cleanup(self) -> anyhow::Result<Option<Cleanup>>;
}

impl EffectOutput for () {
    fn into_cleanup(self) -> anyhow::Result<Option<Cleanup>> {
        Ok(None)
    }
}

impl EffectOutput for Cleanup {
    fn into_cleanup(self) -> anyhow::Result<Option<Cleanup>> {
        Ok(Some(self))
    }
}

impl EffectOutput for Option<Cleanup> {
    fn into_cleanup(self) -> anyhow::Result<Option<Cleanup>> {
        Ok(self)
    }
}

impl<E> EffectOutput for Result<(), E>
where
    E: Into<anyhow::Error>,
{
    fn into_cleanup(self) -> anyhow::Result<Option<Cleanup>> {
        self.map(|()| None).map_err(Into::into)
    }
}

impl<E> EffectOutput for Result<Cleanup, E>
where
    E: Into<anyhow::Error>,
{
    fn into_cleanup(self) -> anyhow::Result<Option<Cleanup>> {
        self.map(Some).map_err(Into::into)
    }
}

/// Per-effect behaviour switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectOptions {
    /// Debug name, used in logs and errors.
    pub name: Option<String>,
    /// Run exactly once; later changes are ignored.
    pub once: bool,
    /// Cancel the previous run's token before starting a new run, and drop
    /// whatever that run's future produces afterwards.
    pub prevent_overlap: bool,
    /// Do not re-run because of writes this run made to its own
    /// dependencies.
    pub prevent_loops: bool,
}

impl EffectOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    pub fn prevent_overlap(mut self) -> Self {
        self.prevent_overlap = true;
        self
    }

    pub fn prevent_loops(mut self) -> Self {
        self.prevent_loops = true;
        self
    }
}

/// Handed to the effect body on every run.
pub struct EffectContext {
    name: Option<Arc<str>>,
    token: CancelToken,
    run: usize,
    cleanups: Mutex<Vec<Cleanup>>,
}

impl EffectContext {
    /// This run's cancellation token.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Register a cleanup for this run, in addition to any returned one.
    pub fn on_cleanup<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.cleanups.lock().push(Cleanup::new(f));
    }

    /// 1 on the first run, 2 on the second, and so on.
    pub fn run_count(&self) -> usize {
        self.run
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

type SyncBody = Box<dyn Fn(&EffectContext) -> anyhow::Result<Option<Cleanup>> + Send + Sync>;
type AsyncBody =
    Box<dyn Fn(&EffectContext) -> BoxFuture<'static, anyhow::Result<Option<Cleanup>>> + Send + Sync>;

enum Body {
    Sync(SyncBody),
    Async(AsyncBody),
}

enum Outcome {
    Ready(anyhow::Result<Option<Cleanup>>),
    Pending(BoxFuture<'static, anyhow::Result<Option<Cleanup>>>),
}

struct EffectInner {
    runtime: Weak<RuntimeInner>,
    this: Weak<EffectInner>,
    id: NodeId,
    name: Option<Arc<str>>,
    options: EffectOptions,
    body: Body,
    runs: AtomicUsize,
    disposed: AtomicBool,
    /// A `once` effect that has run.
    finished: AtomicBool,
    /// Token of the latest run.
    token: Mutex<Option<CancelToken>>,
    cleanups: Mutex<Vec<Cleanup>>,
}

impl EffectInner {
    fn label(&self) -> String {
        match &self.name {
            Some(name) => name.to_string(),
            None => self.id.to_string(),
        }
    }

    fn run_cleanups(&self) {
        let cleanups = std::mem::take(&mut *self.cleanups.lock());
        for cleanup in cleanups {
            cleanup.run();
        }
    }

    /// Keep cleanups for the next run, or run them now if the effect is gone.
    fn install(&self, cleanups: Vec<Cleanup>) {
        if cleanups.is_empty() {
            return;
        }
        if self.disposed.load(Ordering::SeqCst) {
            for cleanup in cleanups {
                cleanup.run();
            }
            return;
        }
        self.cleanups.lock().extend(cleanups);
        // Disposed while we were installing.
        if self.disposed.load(Ordering::SeqCst) {
            self.run_cleanups();
        }
    }

    fn finish_run(&self, runtime: &Runtime, stale: bool) {
        if self.options.once {
            self.finished.store(true, Ordering::SeqCst);
            runtime.remove_node(self.id);
            return;
        }
        if !stale {
            return;
        }
        if self.options.prevent_loops {
            if runtime.debug_allows(self.name.as_deref()) {
                debug!(target: "ripple::effect", effect = %self.label(), "self-triggered rerun suppressed");
            }
        } else {
            runtime.requeue(self.id);
        }
    }

    fn spawn(&self, handle: &Handle, token: CancelToken, future: BoxFuture<'static, anyhow::Result<Option<Cleanup>>>) {
        let effect = self.this.clone();
        handle.spawn(async move {
            let outcome = future.await;
            match effect.upgrade() {
                Some(effect) => effect.settle(&token, outcome),
                None => {
                    if let Ok(Some(cleanup)) = outcome {
                        cleanup.run();
                    }
                }
            }
        });
    }

    /// Apply the result of an async run.
    ///
    /// Holds the evaluation lock so a concurrent rerun cannot cancel the
    /// token between the check and the install.
    fn settle(&self, token: &CancelToken, outcome: anyhow::Result<Option<Cleanup>>) {
        let runtime = Runtime::from_weak(&self.runtime);
        let _evaluation = runtime.as_ref().map(Runtime::evaluation);
        if token.is_cancelled() || self.disposed.load(Ordering::SeqCst) {
            debug!(target: "ripple::effect", effect = %self.label(), "discarding result of cancelled run");
            if let Ok(Some(cleanup)) = outcome {
                cleanup.run();
            }
            return;
        }
        match outcome {
            Ok(cleanup) => self.install(cleanup.into_iter().collect()),
            Err(err) => {
                warn!(target: "ripple::effect", effect = %self.label(), error = %err, "async effect failed");
            }
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let runtime = Runtime::from_weak(&self.runtime);
        let _evaluation = runtime.as_ref().map(Runtime::evaluation);
        if let Some(token) = self.token.lock().take() {
            token.cancel();
        }
        self.run_cleanups();
        if let Some(runtime) = &runtime {
            runtime.remove_node(self.id);
            if runtime.debug_allows(self.name.as_deref()) {
                debug!(target: "ripple::effect", effect = %self.label(), "effect disposed");
            }
        }
    }
}

impl Reactive for EffectInner {
    fn update(&self) -> Result<bool> {
        let Some(runtime) = Runtime::from_weak(&self.runtime) else {
            return Ok(false);
        };
        if self.disposed.load(Ordering::SeqCst) || self.finished.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let handle = match &self.body {
            Body::Sync(_) => None,
            Body::Async(_) => match Handle::try_current() {
                Ok(handle) => Some(handle),
                Err(_) => {
                    return Err(ReactiveError::NoAsyncRuntime {
                        effect: self.label(),
                    })
                }
            },
        };

        let previous = self.token.lock().take();
        if let Some(previous) = previous {
            if self.options.prevent_overlap {
                previous.cancel();
            }
        }
        self.run_cleanups();

        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancelToken::new();
        *self.token.lock() = Some(token.clone());
        let ctx = EffectContext {
            name: self.name.clone(),
            token: token.clone(),
            run,
            cleanups: Mutex::new(Vec::new()),
        };

        let logged = runtime.debug_allows(self.name.as_deref());
        let started = (logged && runtime.timing_enabled()).then(Instant::now);
        let tracked = match runtime.run_tracked(self.id, || match &self.body {
            Body::Sync(body) => Outcome::Ready(body(&ctx)),
            Body::Async(body) => Outcome::Pending(body(&ctx)),
        }) {
            Ok(tracked) => tracked,
            Err(err) => {
                // Cleanups registered before the failure still belong to this run.
                self.install(ctx.cleanups.into_inner());
                return Err(err);
            }
        };
        self.finish_run(&runtime, tracked.stale);

        if logged {
            debug!(
                target: "ripple::effect",
                effect = %self.label(),
                run,
                stale = tracked.stale,
                elapsed_us = started.map(|t| u64::try_from(t.elapsed().as_micros()).unwrap_or(u64::MAX)),
                "effect ran"
            );
        }

        let mut cleanups = ctx.cleanups.into_inner();
        let result = match tracked.value {
            Outcome::Ready(result) => result,
            Outcome::Pending(future) => {
                if let Some(handle) = &handle {
                    self.spawn(handle, token, future);
                }
                Ok(None)
            }
        };
        match result {
            Ok(cleanup) => {
                cleanups.extend(cleanup);
                self.install(cleanups);
                Ok(true)
            }
            Err(err) => {
                self.install(cleanups);
                let err = ReactiveError::effect(self.label(), err);
                warn!(target: "ripple::effect", error = %err, "effect failed");
                Err(err)
            }
        }
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        self.run_cleanups();
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// An effect stays registered until [`dispose`](Effect::dispose) is called;
/// dropping the handle does not stop it.
///
/// # Example
///
/// ```rust
/// use ripple_core::Runtime;
///
/// let runtime = Runtime::new();
/// let count = runtime.signal(0);
///
/// let effect = {
///     let count = count.clone();
///     runtime.effect(move |_| println!("Count is: {}", count.get())).unwrap()
/// };
///
/// count.set(5).unwrap(); // Prints: "Count is: 5"
/// effect.dispose();
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create an effect on the current thread's runtime.
    pub fn new<F, O>(body: F) -> Result<Self>
    where
        F: Fn(&EffectContext) -> O + Send + Sync + 'static,
        O: EffectOutput,
    {
        Runtime::current().effect(body)
    }

    pub(crate) fn create<F, O>(runtime: &Runtime, options: EffectOptions, body: F) -> Result<Self>
    where
        F: Fn(&EffectContext) -> O + Send + Sync + 'static,
        O: EffectOutput,
    {
        let body: SyncBody = Box::new(move |ctx: &EffectContext| body(ctx).into_cleanup());
        Self::start(runtime, options, Body::Sync(body))
    }

    pub(crate) fn create_async<F, Fut, O>(runtime: &Runtime, options: EffectOptions, body: F) -> Result<Self>
    where
        F: Fn(&EffectContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
        O: EffectOutput + 'static,
    {
        if Handle::try_current().is_err() {
            let effect = options.name.clone().unwrap_or_else(|| "<unnamed>".to_string());
            return Err(ReactiveError::NoAsyncRuntime { effect });
        }
        let body: AsyncBody = Box::new(move |ctx: &EffectContext| body(ctx).map(O::into_cleanup).boxed());
        Self::start(runtime, options, Body::Async(body))
    }

    fn start(runtime: &Runtime, options: EffectOptions, body: Body) -> Result<Self> {
        let name: Option<Arc<str>> = options.name.as_deref().map(Arc::from);
        let node = Node::effect(name.clone());
        let id = node.id();
        let inner = Arc::new_cyclic(|this| EffectInner {
            runtime: runtime.downgrade(),
            this: this.clone(),
            id,
            name,
            options,
            body,
            runs: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            token: Mutex::new(None),
            cleanups: Mutex::new(Vec::new()),
        });
        let registered: Arc<dyn Reactive> = inner.clone();
        runtime.register(node, Some(Registered::Strong(registered)));
        if runtime.debug_allows(inner.name.as_deref()) {
            debug!(target: "ripple::effect", effect = %inner.label(), "effect created");
        }

        let effect = Self { inner };
        let _evaluation = runtime.evaluation();
        let scope = runtime.claim_flush();
        if let Err(err) = effect.inner.update() {
            drop(scope);
            effect.dispose();
            return Err(err);
        }
        if scope.is_some() {
            drop(scope);
            runtime.flush()?;
        }
        Ok(effect)
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn options(&self) -> &EffectOptions {
        &self.inner.options
    }

    /// Stop the effect: cancel its current token, run its cleanups and
    /// remove it from the graph. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Number of times the body has run.
    pub fn run_count(&self) -> usize {
        self.inner.runs.load(Ordering::SeqCst)
    }

    /// Number of signals and memos read by the latest run.
    pub fn dependency_count(&self) -> usize {
        Runtime::from_weak(&self.inner.runtime)
            .map(|runtime| runtime.dependency_count(self.inner.id))
            .unwrap_or_default()
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("run_count", &self.run_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
