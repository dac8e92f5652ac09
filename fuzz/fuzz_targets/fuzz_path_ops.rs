#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rill_core::{PathSegment, Value};

#[derive(Arbitrary, Debug)]
enum FuzzSegment {
    Key(u8),
    Index(u8),
}

impl FuzzSegment {
    fn to_segment(&self) -> PathSegment {
        match self {
            FuzzSegment::Key(k) => PathSegment::Key(format!("k{}", k % 4)),
            FuzzSegment::Index(i) => PathSegment::Index(usize::from(i % 8)),
        }
    }
}

#[derive(Arbitrary, Debug)]
enum FuzzOp {
    Set { path: Vec<FuzzSegment>, value: i32 },
    SetNull { path: Vec<FuzzSegment> },
    Get { path: Vec<FuzzSegment> },
}

fn to_path(segments: &[FuzzSegment]) -> Vec<PathSegment> {
    segments.iter().take(6).map(FuzzSegment::to_segment).collect()
}

fuzz_target!(|ops: Vec<FuzzOp>| {
    let mut root = Value::Null;
    for op in ops.iter().take(256) {
        match op {
            FuzzOp::Set { path, value } => {
                let path = to_path(path);
                let next = root.set_in(&path, Value::from(*value));
                assert_eq!(next.get_in(&path), Some(&Value::from(*value)));
                root = next;
            }
            FuzzOp::SetNull { path } => {
                let path = to_path(path);
                let before = root.clone();
                root = root.set_in(&path, Value::Null);
                assert_eq!(root.get_in(&path), Some(&Value::Null));
                // Nothing off the edited path moved.
                if let (Some(old), Some(new), Some(head)) =
                    (before.as_map(), root.as_map(), path.first())
                {
                    for (key, value) in old {
                        if head.to_key() != *key {
                            assert!(Value::same_opt(Some(value), new.get(key)));
                        }
                    }
                }
            }
            FuzzOp::Get { path } => {
                let _ = root.get_in(&to_path(path));
            }
        }
    }
    let text = root.to_string();
    let parsed: Value = serde_json::from_str(&text).expect("display output is valid JSON");
    assert_eq!(parsed, root);
});
