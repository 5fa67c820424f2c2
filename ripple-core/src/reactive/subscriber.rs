//! Listener subscriptions on signals and memos.
//!
//! A subscription is a small effect: it reads the source, and from the
//! second run on hands the new value to the listener. Because it is an
//! effect it obeys batching and runs in first-marked order with the others.
//! The listener itself runs untracked, so values it reads do not become
//! dependencies of the subscription.

use std::sync::atomic::{AtomicBool, Ordering};

use super::effect::{Effect, EffectOptions};
use super::runtime::Runtime;
use crate::error::Result;

/// Handle to an attached listener.
///
/// Dropping it detaches the listener, like calling
/// [`unsubscribe`](Subscription::unsubscribe).
#[must_use = "dropping a Subscription detaches the listener immediately"]
#[derive(Debug)]
pub struct Subscription {
    effect: Effect,
}

impl Subscription {
    pub(crate) fn attach<T, R, L>(
        runtime: &Runtime,
        source: Option<&str>,
        read: R,
        listener: L,
    ) -> Result<Self>
    where
        T: Send + Sync + 'static,
        R: Fn() -> Result<T> + Send + Sync + 'static,
        L: Fn(&T) + Send + Sync + 'static,
    {
        let options = EffectOptions {
            name: source.map(|name| format!("{name}.subscribe")),
            ..EffectOptions::default()
        };
        let primed = AtomicBool::new(false);
        let untracked = runtime.clone();
        let effect = runtime.effect_with(options, move |_| -> Result<()> {
            let value = read()?;
            if primed.swap(true, Ordering::SeqCst) {
                untracked.untrack(|| listener(&value));
            }
            Ok(())
        })?;
        Ok(Self { effect })
    }

    /// Detach the listener.
    pub fn unsubscribe(self) {
        self.effect.dispose();
    }

    pub fn is_active(&self) -> bool {
        !self.effect.is_disposed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.effect.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn memo_subscribers_only_hear_new_values() {
        let runtime = Runtime::new();
        let source = runtime.signal(1);
        let input = source.clone();
        let parity = runtime.memo(move || input.get() % 2);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let subscription = parity.subscribe(move |v| log.lock().push(*v)).unwrap();
        assert!(subscription.is_active());

        source.set(3).unwrap();
        source.set(4).unwrap();
        source.set(6).unwrap();
        source.set(7).unwrap();
        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[test]
    fn dropping_detaches() {
        let runtime = Runtime::new();
        let source = runtime.signal_named("count", 0);
        let seen = Arc::new(Mutex::new(0));
        let log = seen.clone();

        {
            let _subscription = source.subscribe(move |_| *log.lock() += 1).unwrap();
            assert_eq!(runtime.effect_count(), 1);
            assert!(runtime.snapshot().named("count.subscribe").is_some());
            source.set(1).unwrap();
        }
        source.set(2).unwrap();
        assert_eq!(*seen.lock(), 1);
        assert_eq!(runtime.effect_count(), 0);
    }

    #[test]
    fn listener_reads_are_not_tracked() {
        let runtime = Runtime::new();
        let source = runtime.signal(0);
        let other = runtime.signal(0);
        let calls = Arc::new(Mutex::new(0));

        let (log, peeked) = (calls.clone(), other.clone());
        let _subscription = source
            .subscribe(move |_| {
                peeked.get();
                *log.lock() += 1;
            })
            .unwrap();

        source.set(1).unwrap();
        other.set(1).unwrap();
        assert_eq!(*calls.lock(), 1);
    }
}
