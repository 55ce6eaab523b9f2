//! Per-instance serialization and interruptible waits

use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use topo_core::{DeferredValue, Interrupt, ResolveError, Resolved, WaitPhase};
use topo_test_utils::Harness;

#[derive(Debug, Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
    runs: AtomicUsize,
}

fn guarded_value(probe: Arc<InFlight>, hold: Duration) -> DeferredValue {
    DeferredValue::from_fn("guarded", move |_ctx| {
        let probe = Arc::clone(&probe);
        async move {
            let now = probe.current.fetch_add(1, Ordering::SeqCst) + 1;
            probe.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(hold).await;
            probe.current.fetch_sub(1, Ordering::SeqCst);
            let run = probe.runs.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Resolved::Value(json!(run)))
        }
    })
}

#[test]
fn one_instance_never_runs_two_bodies_at_once() {
    let harness = Harness::new();
    let probe = Arc::new(InFlight::default());
    let value = Arc::new(guarded_value(Arc::clone(&probe), Duration::from_millis(100)));

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let value = Arc::clone(&value);
            let ctx = harness.ctx_for(harness.sample.web);
            thread::spawn(move || value.resolve_in(&ctx))
        })
        .collect();
    let mut results: Vec<_> = readers
        .into_iter()
        .map(|reader| reader.join().unwrap().unwrap())
        .collect();
    results.sort_by_key(|r| r.as_value().and_then(serde_json::Value::as_u64));

    assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
    assert_eq!(probe.runs.load(Ordering::SeqCst), 2);
    assert_eq!(
        results,
        vec![Resolved::Value(json!(1)), Resolved::Value(json!(2))]
    );
}

#[test]
fn distinct_instances_resolve_in_parallel() {
    let harness = Harness::new();
    let probe = Arc::new(InFlight::default());
    let first = Arc::new(guarded_value(Arc::clone(&probe), Duration::from_millis(200)));
    let second = Arc::new(first.as_ref().clone());

    let readers: Vec<_> = [first, second]
        .into_iter()
        .map(|value| {
            let ctx = harness.ctx_for(harness.sample.web);
            thread::spawn(move || value.resolve_in(&ctx))
        })
        .collect();
    for reader in readers {
        reader.join().unwrap().unwrap();
    }
    assert_eq!(probe.peak.load(Ordering::SeqCst), 2);
}

#[test]
fn no_result_is_cached() {
    let harness = Harness::new();
    let probe = Arc::new(InFlight::default());
    let value = guarded_value(Arc::clone(&probe), Duration::from_millis(1));
    let ctx = harness.ctx_for(harness.sample.web);

    assert_eq!(value.resolve_in(&ctx).unwrap(), Resolved::Value(json!(1)));
    assert_eq!(value.resolve_in(&ctx).unwrap(), Resolved::Value(json!(2)));
}

#[test]
fn interrupt_while_waiting_for_the_lock() {
    let harness = Harness::new();
    let started = Arc::new(AtomicBool::new(false));
    let value = Arc::new({
        let started = Arc::clone(&started);
        DeferredValue::from_fn("slow", move |_ctx| {
            let started = Arc::clone(&started);
            async move {
                started.store(true, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(Resolved::Value(json!("done")))
            }
        })
    });

    let holder = {
        let value = Arc::clone(&value);
        let ctx = harness.ctx_for(harness.sample.web);
        thread::spawn(move || value.resolve_in(&ctx))
    };
    while !started.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(5));
    }

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let value = Arc::clone(&value);
        let ctx = harness.ctx_for(harness.sample.web);
        thread::spawn(move || {
            tx.send(Interrupt::current()).unwrap();
            value.resolve_in(&ctx)
        })
    };
    let interrupt = rx.recv().unwrap();
    thread::sleep(Duration::from_millis(50));
    interrupt.interrupt();

    let err = waiter.join().unwrap().unwrap_err();
    assert!(matches!(
        err,
        ResolveError::Interrupted {
            phase: WaitPhase::Lock
        }
    ));
    assert!(err.is_interrupted());
    assert_eq!(
        holder.join().unwrap().unwrap(),
        Resolved::Value(json!("done"))
    );
}

#[test]
fn interrupt_while_waiting_for_the_task() {
    let harness = Harness::new();
    let value = DeferredValue::from_fn("stuck", |_ctx| async {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Resolved::Value(json!("never")))
    });
    let interrupt = Interrupt::new();

    let raiser = {
        let interrupt = interrupt.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            interrupt.interrupt();
        })
    };
    let err = value
        .resolve_with(&harness.ctx_for(harness.sample.web), &interrupt)
        .unwrap_err();
    raiser.join().unwrap();

    assert!(matches!(
        err,
        ResolveError::Interrupted {
            phase: WaitPhase::Task
        }
    ));
    assert!(interrupt.is_interrupted());

    // the lock was released on the way out: a second attempt reaches the task
    interrupt.clear();
    let raiser = {
        let interrupt = interrupt.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            interrupt.interrupt();
        })
    };
    let err = value
        .resolve_with(&harness.ctx_for(harness.sample.web), &interrupt)
        .unwrap_err();
    raiser.join().unwrap();
    assert!(matches!(
        err,
        ResolveError::Interrupted {
            phase: WaitPhase::Task
        }
    ));
}

#[test]
fn task_failures_reach_the_caller_unchanged() {
    let harness = Harness::new();
    let value = DeferredValue::from_fn("failing", |_ctx| async {
        Err(ResolveError::invalid_arguments("failing", "always fails"))
    });
    let err = value
        .resolve_in(&harness.ctx_for(harness.sample.web))
        .unwrap_err();
    assert_eq!(err.to_string(), "invalid arguments to failing: always fails");
    assert_eq!(harness.runtime.stats().failed, 1);
}
