#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rill_core::{Atom, PathSegment, Prism, Ticker, Value, prism, val};

const KEYS: [&str; 3] = ["a", "b", "c"];

#[derive(Arbitrary, Debug)]
enum FuzzOp {
    /// Write `value` at `KEYS[key % 3]`, optionally one level deeper.
    Set { key: u8, nested: bool, value: i8 },
    /// Read one reader without ticking.
    Read { reader: u8 },
    Tick,
    /// Replace the whole tree with a fresh one.
    Reset,
}

fn key_path(key: u8, nested: bool) -> Vec<PathSegment> {
    let mut path = vec![PathSegment::from(KEYS[usize::from(key % 3)])];
    if nested {
        path.push(PathSegment::from("inner"));
    }
    path
}

fuzz_target!(|ops: Vec<FuzzOp>| {
    let atom = Atom::new(Value::map());
    let ticker = Ticker::new();

    // One reader per (key, nested) pair; the odd ones are kept hot.
    let readers: Vec<(Vec<PathSegment>, Prism<Option<Value>>)> = (0..6u8)
        .map(|i| {
            let path = key_path(i / 2, i % 2 == 1);
            let pointer = atom.pointer_at(&path);
            (path, prism(move || val(&pointer)))
        })
        .collect();
    let _subs: Vec<_> = readers
        .iter()
        .skip(1)
        .step_by(2)
        .map(|(_, r)| r.keep_hot(&ticker))
        .collect();

    for op in ops.iter().take(256) {
        match op {
            FuzzOp::Set { key, nested, value } => {
                atom.set_in(&key_path(*key, *nested), Value::from(i32::from(*value)));
            }
            FuzzOp::Read { reader } => {
                let (path, r) = &readers[usize::from(*reader) % readers.len()];
                let expected = atom.get_in(path);
                assert_eq!(r.get_value().expect("reader never fails"), expected);
            }
            FuzzOp::Tick => {
                ticker.tick(0.0).expect("flush settles");
                for (path, r) in readers.iter().skip(1).step_by(2) {
                    assert_eq!(r.peek().flatten(), atom.get_in(path));
                }
            }
            FuzzOp::Reset => atom.set(Value::map()),
        }
    }
});
