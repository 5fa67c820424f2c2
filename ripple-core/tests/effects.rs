//! Effect Tests
//!
//! Cleanup ordering, disposal, loop guards, and async effects driven by tokio.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use ripple_core::{CancelToken, Cleanup, DebugConfig, EffectOptions, ReactiveError, Runtime};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("ripple=debug")
        .with_test_writer()
        .try_init();
}

type Log = Arc<Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// The previous cleanup always runs before the next run starts, and before
/// the effect is removed on disposal.
#[test]
fn cleanup_precedes_rerun_and_removal() {
    init_tracing();
    let runtime = Runtime::new();
    runtime.set_debug(DebugConfig::verbose());
    let cell = runtime.signal(0);
    let events = log();

    let (input, events_in) = (cell.clone(), events.clone());
    let effect = runtime
        .effect_with(EffectOptions::named("lifecycle"), move |ctx| {
            let value = input.get();
            events_in.lock().push(format!("run {value}"));
            let events = events_in.clone();
            ctx.on_cleanup(move || events.lock().push(format!("extra cleanup {value}")));
            let events = events_in.clone();
            Cleanup::new(move || events.lock().push(format!("cleanup {value}")))
        })
        .unwrap();

    cell.set(1).unwrap();
    effect.dispose();

    assert_eq!(
        *events.lock(),
        vec![
            "run 0",
            "extra cleanup 0",
            "cleanup 0",
            "run 1",
            "extra cleanup 1",
            "cleanup 1",
        ]
    );
    assert!(runtime.snapshot().named("lifecycle").is_none());
}

/// An effect may dispose itself from inside its body.
#[test]
fn effect_can_dispose_itself() {
    let runtime = Runtime::new();
    let cell = runtime.signal(0);
    let slot: Arc<Mutex<Option<ripple_core::Effect>>> = Arc::new(Mutex::new(None));
    let runs = Arc::new(AtomicI32::new(0));

    let (input, me, count) = (cell.clone(), slot.clone(), runs.clone());
    let effect = runtime
        .effect(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            if input.get() >= 2 {
                if let Some(effect) = me.lock().take() {
                    effect.dispose();
                }
            }
        })
        .unwrap();
    *slot.lock() = Some(effect.clone());

    cell.set(1).unwrap();
    cell.set(2).unwrap();
    cell.set(3).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert!(effect.is_disposed());
    assert_eq!(runtime.effect_count(), 0);
}

/// Effects may write signals other effects depend on; the chain settles
/// within one flush.
#[test]
fn effects_can_feed_each_other() {
    let runtime = Runtime::new();
    let celsius = runtime.signal(0.0_f64);
    let fahrenheit = runtime.signal(32.0_f64);
    let shown = log();

    let (c, f) = (celsius.clone(), fahrenheit.clone());
    let _convert = runtime
        .effect(move |_| f.set(c.get() * 9.0 / 5.0 + 32.0))
        .unwrap();
    let (f, out) = (fahrenheit.clone(), shown.clone());
    let _display = runtime
        .effect(move |_| out.lock().push(format!("{:.1}", f.get())))
        .unwrap();

    celsius.set(100.0).unwrap();
    assert_eq!(*shown.lock(), vec!["32.0", "212.0"]);
}

/// Integrity errors inside an effect's memo reads surface to the writer.
#[test]
fn cycle_inside_effect_reaches_writer() {
    let runtime = Runtime::new();
    let trigger = runtime.signal(false);
    let slot: Arc<Mutex<Option<ripple_core::Memo<i32>>>> = Arc::new(Mutex::new(None));

    let (flag, late) = (trigger.clone(), slot.clone());
    let looping = runtime.memo_named("looping", move || {
        if !flag.get() {
            return 0;
        }
        let me = late.lock().clone();
        me.map(|m| m.get()).unwrap_or_default()
    });
    *slot.lock() = Some(looping.clone());

    let reader = looping.clone();
    let _effect = runtime
        .effect_with(EffectOptions::named("watch"), move |_| reader.try_get().map(|_| ()))
        .unwrap();

    let err = trigger.set(true).unwrap_err();
    match err {
        ReactiveError::EffectExecution { effect, source } => {
            assert_eq!(effect, "watch");
            assert!(source.to_string().contains("looping -> looping"));
        }
        other => panic!("unexpected error: {other}"),
    }
    slot.lock().take();
}

/// Cleanups registered before a run fails with an engine error are kept and
/// run on disposal.
#[test]
fn cleanups_survive_a_failed_run() {
    let runtime = Runtime::new();
    let trigger = runtime.signal(0);
    let slot: Arc<Mutex<Option<ripple_core::Memo<i32>>>> = Arc::new(Mutex::new(None));
    let events = log();

    let late = slot.clone();
    let looping = runtime.memo_named("looping", move || {
        let me = late.lock().clone();
        me.map(|m| m.get()).unwrap_or_default()
    });
    *slot.lock() = Some(looping.clone());

    let (input, reader, events_in) = (trigger.clone(), looping.clone(), events.clone());
    let effect = runtime
        .effect_with(EffectOptions::named("guarded"), move |ctx| {
            let run = input.get();
            let events = events_in.clone();
            ctx.on_cleanup(move || events.lock().push(format!("cleanup {run}")));
            if run == 1 {
                reader.get();
            }
        })
        .unwrap();

    let err = trigger.set(1).unwrap_err();
    assert!(matches!(err, ReactiveError::CyclicDependency { .. }));
    assert_eq!(*events.lock(), vec!["cleanup 0"]);

    effect.dispose();
    assert_eq!(*events.lock(), vec!["cleanup 0", "cleanup 1"]);
    slot.lock().take();
}

/// Starting a second run cancels the first one's token before the second
/// run's body starts, and the first run's output is not applied.
#[tokio::test]
async fn prevent_overlap_cancels_and_discards_previous_run() {
    init_tracing();
    let runtime = Runtime::new();
    let query = runtime.signal(1);
    let events = log();
    let tokens: Arc<Mutex<Vec<CancelToken>>> = Arc::new(Mutex::new(Vec::new()));

    let (input, events_in, tokens_in) = (query.clone(), events.clone(), tokens.clone());
    let effect = runtime
        .async_effect(
            EffectOptions::named("search").prevent_overlap(),
            move |ctx| {
                let q = input.get();
                {
                    let mut seen = tokens_in.lock();
                    let previous_cancelled = seen.iter().all(CancelToken::is_cancelled);
                    events_in.lock().push(format!("start {q} previous_cancelled={previous_cancelled}"));
                    seen.push(ctx.token().clone());
                }
                let token = ctx.token().clone();
                let events = events_in.clone();
                async move {
                    let delay = if q == 1 { 200 } else { 10 };
                    match token.run_until_cancelled(tokio::time::sleep(Duration::from_millis(delay))).await {
                        Some(()) => events.lock().push(format!("done {q}")),
                        None => events.lock().push(format!("cancelled {q}")),
                    }
                    let events = events.clone();
                    Cleanup::new(move || events.lock().push(format!("cleanup {q}")))
                }
            },
        )
        .unwrap();

    query.set(2).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    {
        let events = events.lock();
        assert_eq!(events[0], "start 1 previous_cancelled=true");
        assert_eq!(events[1], "start 2 previous_cancelled=true");
        assert!(events.contains(&"cancelled 1".to_string()));
        assert!(events.contains(&"done 2".to_string()));
        // The cancelled run's cleanup ran at once instead of being installed.
        let cancelled_at = events.iter().position(|e| e == "cancelled 1").unwrap();
        assert_eq!(events[cancelled_at + 1], "cleanup 1");
        assert!(!events.contains(&"cleanup 2".to_string()));
    }

    effect.dispose();
    assert!(events.lock().contains(&"cleanup 2".to_string()));
}

/// Without `prevent_overlap` earlier runs keep their tokens.
#[tokio::test]
async fn overlapping_runs_are_allowed_by_default() {
    let runtime = Runtime::new();
    let query = runtime.signal(1);
    let tokens: Arc<Mutex<Vec<CancelToken>>> = Arc::new(Mutex::new(Vec::new()));

    let (input, tokens_in) = (query.clone(), tokens.clone());
    let effect = runtime
        .async_effect(EffectOptions::default(), move |ctx| {
            input.get();
            tokens_in.lock().push(ctx.token().clone());
            async {}
        })
        .unwrap();
    query.set(2).unwrap();

    {
        let tokens = tokens.lock();
        assert_eq!(tokens.len(), 2);
        assert!(tokens.iter().all(|t| !t.is_cancelled()));
    }

    // Disposal cancels only the latest run.
    effect.dispose();
    let tokens = tokens.lock();
    assert!(!tokens[0].is_cancelled());
    assert!(tokens[1].is_cancelled());
}

/// Async results arriving after disposal are dropped.
#[tokio::test]
async fn dispose_discards_in_flight_result() {
    let runtime = Runtime::new();
    let events = log();

    let events_in = events.clone();
    let effect = runtime
        .async_effect(EffectOptions::named("slow"), move |ctx| {
            let token = ctx.token().clone();
            let events = events_in.clone();
            async move {
                token.cancelled().await;
                events.lock().push("observed cancel".to_string());
                let events = events.clone();
                Cleanup::new(move || events.lock().push("cleanup".to_string()))
            }
        })
        .unwrap();

    effect.dispose();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*events.lock(), vec!["observed cancel", "cleanup"]);
}

/// Async failures are logged and dropped; they never reach the writer.
#[tokio::test]
async fn async_errors_are_not_propagated() {
    init_tracing();
    let runtime = Runtime::new();
    let cell = runtime.signal(0);
    let attempts = Arc::new(AtomicI32::new(0));

    let (input, count) = (cell.clone(), attempts.clone());
    let _effect = runtime
        .async_effect(EffectOptions::named("upload"), move |_| {
            input.get();
            let count = count.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("offline"))
            }
        })
        .unwrap();

    cell.set(1).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

/// A settled future may write signals; dependents react as to any write.
#[tokio::test]
async fn async_results_can_be_written_back() {
    let runtime = Runtime::new();
    let user_id = runtime.signal(1u32);
    let profile = runtime.signal(String::new());
    let rendered = log();

    let (id, target) = (user_id.clone(), profile.clone());
    let _fetch = runtime
        .async_effect(EffectOptions::named("fetch").prevent_overlap(), move |ctx| {
            let id = id.get();
            let (target, token) = (target.clone(), ctx.token().clone());
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if !token.is_cancelled() {
                    target.set(format!("user-{id}"))?;
                }
                Ok::<_, ReactiveError>(())
            }
        })
        .unwrap();

    let (source, out) = (profile.clone(), rendered.clone());
    let _render = runtime
        .effect(move |_| {
            let text = source.get();
            if !text.is_empty() {
                out.lock().push(text);
            }
        })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    user_id.set(2).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(*rendered.lock(), vec!["user-1", "user-2"]);
}
