#![forbid(unsafe_code)]

//! End-to-end dataflow scenarios.
//!
//! Validates that:
//! 1. Pointers built twice through the same path are identical.
//! 2. An equal recompute never recomputes dependents.
//! 3. Writes to `a.b` leave readers of `a.c` clean.
//! 4. Lazy prisms ignore ticks; hot prisms recompute once per flush.
//! 5. Re-targeting a proxy redirects existing prisms and notifies once.
//! 6. Mutual reads fail with a cycle error.
//! 7. Mutations between ticks produce one notification with the final value.
//! 8. Compute errors reach the tick caller and keep the last good value.
//! 9. Unsubscribing from inside a callback is safe.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rill_core::{
    Atom, Error, PointerProxy, Prism, Status, Subscription, Ticker, Value, path, prism, val,
};
use serde_json::json;

// ============================================================================
// Helpers
// ============================================================================

/// Prism over `compute` that counts its runs.
fn counted<T: Clone + PartialEq + 'static>(
    compute: impl Fn() -> rill_core::Result<T> + 'static,
) -> (Prism<T>, Rc<Cell<u32>>) {
    let runs = Rc::new(Cell::new(0));
    let count = Rc::clone(&runs);
    let p = prism(move || {
        count.set(count.get() + 1);
        compute()
    });
    (p, runs)
}

fn number(v: Option<Value>) -> i64 {
    v.and_then(|v| v.as_i64()).unwrap_or(i64::MIN)
}

fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<T>>>, impl Fn(&T) + 'static) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    (log, move |v: &T| sink.borrow_mut().push(v.clone()))
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn pointer_identity_is_stable() {
    let atom = Atom::new(json!({}));
    let root = atom.pointer();
    for segments in [path!["a"], path!["a", "b", 3usize], path![0usize, "x", "y", "z"]] {
        let first = root.at(&segments);
        let second = segments.iter().fold(atom.pointer(), |p, s| p.child(s));
        assert_eq!(first, second);
        assert_eq!(first.to_prism().id(), second.to_prism().id());
    }
}

#[test]
fn equal_recompute_does_not_touch_dependents() {
    let atom = Atom::new(json!({"n": 2}));
    let n = atom.pointer().key("n");
    let (d2, d2_runs) = counted(move || Ok(number(val(&n)?) % 2 == 0));
    let upstream = d2.clone();
    let (d1, d1_runs) = counted(move || Ok(if upstream.get_value()? { "even" } else { "odd" }));

    assert_eq!(d1.get_value(), Ok("even"));
    atom.set_in(&path!["n"], 8);
    assert_eq!(d1.get_value(), Ok("even"));
    assert_eq!(d2_runs.get(), 2);
    assert_eq!(d1_runs.get(), 1);
}

#[test]
fn path_scoped_invalidation() {
    let atom = Atom::new(json!({"a": {"b": 1, "c": 2}}));
    let c = atom.pointer().key("a").key("c");
    let (reader, runs) = counted(move || Ok(number(val(&c)?)));
    assert_eq!(reader.get_value(), Ok(2));

    atom.set_in(&path!["a", "b"], 99);
    assert_eq!(reader.status(), Status::Clean);
    assert_eq!(reader.peek(), Some(2));
    assert_eq!(runs.get(), 1);
}

#[test]
fn lazy_prisms_wait_for_reads_and_hot_prisms_recompute_once_per_flush() {
    let ticker = Ticker::new();
    let atom = Atom::new(json!({"n": 1}));
    let (n1, n2) = (atom.pointer().key("n"), atom.pointer().key("n"));
    let (lazy, lazy_runs) = counted(move || Ok(number(val(&n1)?)));
    let (hot, hot_runs) = counted(move || Ok(number(val(&n2)?)));
    let _ = lazy.get_value();
    let _sub = hot.keep_hot(&ticker);

    atom.set_in(&path!["n"], 2);
    ticker.tick(0.0).unwrap();
    ticker.tick(16.0).unwrap();
    assert_eq!(lazy_runs.get(), 1);
    assert_eq!(hot_runs.get(), 2);

    atom.set_in(&path!["n"], 3);
    ticker.tick(32.0).unwrap();
    assert_eq!(hot_runs.get(), 3);
    assert_eq!(lazy.get_value(), Ok(3));
    assert_eq!(lazy_runs.get(), 2);
}

#[test]
fn proxy_retarget_redirects_and_notifies_once() {
    let ticker = Ticker::new();
    let p1 = Atom::new(json!({"x": 1}));
    let p2 = Atom::new(json!({"x": 2}));
    let proxy = PointerProxy::new(p1.pointer());
    let x = rill_core::IdentityPrismProvider::identity_prism(&proxy, &path!["x"]);
    assert_eq!(x.get_value(), Ok(Some(Value::from(1))));

    let (log, record) = recorder::<Option<Value>>();
    let _sub = x.on_change(&ticker, record);
    proxy.set_pointer(p2.pointer());
    ticker.tick(0.0).unwrap();

    assert_eq!(x.get_value(), Ok(Some(Value::from(2))));
    assert_eq!(*log.borrow(), vec![Some(Value::from(2))]);
}

#[test]
fn mutual_reads_are_a_cycle_error() {
    let late_b: Rc<RefCell<Option<Prism<i64>>>> = Rc::new(RefCell::new(None));
    let b_handle = Rc::clone(&late_b);
    let a = prism(move || {
        let b = b_handle.borrow().clone();
        b.map_or(Ok(0), |b| b.get_value())
    })
    .with_label("A");
    let a_handle = a.clone();
    let b = prism(move || a_handle.get_value()).with_label("B");
    *late_b.borrow_mut() = Some(b);

    match a.get_value() {
        Err(Error::Cycle { label }) => assert_eq!(label, "A"),
        other => panic!("expected a cycle error, got {other:?}"),
    }
}

#[test]
fn flush_is_atomic_across_mutations() {
    let ticker = Ticker::new();
    let atom = Atom::new(json!({"a": 0, "b": 0}));
    let (a, b) = (atom.pointer().key("a"), atom.pointer().key("b"));
    let sum = prism(move || Ok(number(val(&a)?) + number(val(&b)?)));
    let (log, record) = recorder::<i64>();
    let _sub = sum.on_change(&ticker, record);

    atom.set_in(&path!["a"], 1);
    atom.set_in(&path!["b"], 10);
    atom.set_in(&path!["a"], 5);
    let report = ticker.tick(0.0).unwrap();

    assert_eq!(*log.borrow(), vec![15]);
    assert_eq!(report.notified, 1);
    assert_eq!(sum.version(), 2);
}

#[test]
fn compute_errors_reach_the_tick_caller() {
    let ticker = Ticker::new();
    let atom = Atom::new(json!({"d": 2}));
    let d = atom.pointer().key("d");
    let ratio = prism(move || match number(val(&d)?) {
        0 => Err(Error::compute("division by zero")),
        d => Ok(100 / d),
    });
    let (log, record) = recorder::<i64>();
    let _sub = ratio.on_change(&ticker, record);

    atom.set_in(&path!["d"], 0);
    assert_eq!(ticker.tick(0.0), Err(Error::compute("division by zero")));
    assert_eq!(ratio.peek(), Some(50));

    atom.set_in(&path!["d"], 4);
    ticker.tick(1.0).unwrap();
    assert_eq!(*log.borrow(), vec![25]);
}

#[test]
fn unsubscribing_inside_a_callback_is_safe() {
    let ticker = Ticker::new();
    let atom = Atom::new(json!({"n": 0}));
    let n = atom.pointer().key("n");
    let current = prism(move || Ok(number(val(&n)?)));

    let held: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
    let fired = Rc::new(Cell::new(0));
    let (slot, count) = (Rc::clone(&held), Rc::clone(&fired));
    let sub = current.on_change(&ticker, move |_| {
        count.set(count.get() + 1);
        slot.borrow_mut().take();
    });
    *held.borrow_mut() = Some(sub);

    atom.set_in(&path!["n"], 1);
    ticker.tick(0.0).unwrap();
    assert!(!current.is_hot());

    atom.set_in(&path!["n"], 2);
    ticker.tick(1.0).unwrap();
    assert_eq!(fired.get(), 1);
    assert_eq!(current.status(), Status::Stale);
}

#[test]
fn hot_chain_settles_in_one_tick() {
    let ticker = Ticker::new();
    let atom = Atom::new(json!({"n": 1}));
    let n = atom.pointer().key("n");
    let base = prism(move || Ok(number(val(&n)?)));
    let doubled = base.map(|v| v * 2);
    let described = doubled.map(|v| format!("n*2={v}"));
    let (log, record) = recorder::<String>();
    let _sub = described.on_change(&ticker, record);

    atom.set_in(&path!["n"], 21);
    ticker.tick(0.0).unwrap();
    assert_eq!(*log.borrow(), vec!["n*2=42".to_owned()]);
    assert_eq!(ticker.pending(), 0);
    assert_eq!(described.status(), Status::Clean);
}
